//! Test fixtures and helpers.
//!
//! Pre-built units, ability content and simulations for consistent
//! testing.

use fixed::types::I32F32;
use skirmish_core::abilities::AbilityLibrary;
use skirmish_core::config::SimConfig;
use skirmish_core::math::Vec2Fixed;
use skirmish_core::simulation::Simulation;
use skirmish_core::unit::{Team, UnitSpec};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// A point at integer coordinates.
#[must_use]
pub fn at(x: i32, y: i32) -> Vec2Fixed {
    Vec2Fixed::from_ints(x, y)
}

/// Friendly melee unit: 10 hp, 2 damage.
#[must_use]
pub fn knight(id: &str, x: i32, y: i32) -> UnitSpec {
    UnitSpec::new("knight", at(x, y))
        .with_id(id)
        .with_hp(10)
        .with_damage(2)
        .with_team(Team::Friendly)
}

/// Hostile melee unit: 10 hp, 3 damage.
#[must_use]
pub fn orc(id: &str, x: i32, y: i32) -> UnitSpec {
    UnitSpec::new("orc", at(x, y))
        .with_id(id)
        .with_hp(10)
        .with_damage(3)
        .with_team(Team::Hostile)
}

/// Stationary 20 hp unit with no attack.
#[must_use]
pub fn dummy(id: &str, x: i32, y: i32, team: Team) -> UnitSpec {
    UnitSpec::new("dummy", at(x, y))
        .with_id(id)
        .with_hp(20)
        .with_team(team)
}

/// Ability content shared by scenario tests and benchmarks.
pub const ABILITIES_JSON: &str = r#"[
    {
        "name": "firebolt",
        "cooldown": 20,
        "trigger": "distance(target) < 10",
        "effects": [
            {"type": "projectile", "damage": "self.damage * 2", "speed": 1, "aspect": "fire", "kind": "firebolt"}
        ]
    },
    {
        "name": "mend",
        "cooldown": 30,
        "target": "self",
        "trigger": "self.hp < self.maxHp / 2",
        "effects": [{"type": "heal", "amount": "self.maxHp * 0.25"}]
    },
    {
        "name": "warcry",
        "cooldown": 50,
        "maxUses": 1,
        "target": "self.pos",
        "trigger": "count.enemies(5) >= 1",
        "effects": [
            {"type": "area_buff", "radius": 4, "meta": {"damage_bonus": 1}, "duration": 40}
        ]
    },
    {
        "name": "quake",
        "cooldown": 40,
        "target": "self.pos",
        "trigger": "count.enemies(3) >= 2",
        "effects": [
            {"type": "aoe", "radius": 3, "damage": {"$random": [3, 6]}, "aspect": "earth"},
            {"type": "particles", "kind": "dust", "count": 6}
        ]
    }
]"#;

/// The fixture ability library.
///
/// # Panics
///
/// Panics if [`ABILITIES_JSON`] does not load, which is a fixture bug.
#[must_use]
pub fn ability_library() -> AbilityLibrary {
    AbilityLibrary::from_json_str(ABILITIES_JSON).expect("fixture abilities must load")
}

/// Simulation with the default rules and the fixture library.
///
/// # Panics
///
/// Panics if the configuration is invalid.
#[must_use]
pub fn simulation(config: SimConfig) -> Simulation {
    Simulation::with_default_rules(config, ability_library()).expect("fixture config must be valid")
}

/// Two lines of `per_side` units facing each other, with hunting and a
/// mix of abilities, on a 64x64 field.
///
/// # Panics
///
/// Panics if `2 * per_side` exceeds the default capacity.
#[must_use]
pub fn skirmish(per_side: i32, seed: u32) -> Simulation {
    let mut sim = simulation(SimConfig {
        seed,
        ..SimConfig::default()
    });
    for i in 0..per_side {
        let y = 4 + (i % 28) * 2;
        let x = 4 + i / 28;
        let mut friend = knight(&format!("k{i}"), x, y).with_meta("speed", 0.5.into());
        if i % 3 == 0 {
            friend = friend.with_ability("firebolt").with_ability("mend");
        }
        let mut foe = orc(&format!("o{i}"), 60 - x, y).with_meta("speed", 0.5.into());
        if i % 4 == 0 {
            foe = foe.with_ability("warcry").with_ability("quake");
        }
        sim.spawn(friend).expect("fixture spawn");
        sim.spawn(foe).expect("fixture spawn");
    }
    sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_is_valid() {
        let library = ability_library();
        assert_eq!(library.len(), 4);
        assert!(library.validate().is_ok());
    }

    #[test]
    fn test_skirmish_spawns_both_sides() {
        let sim = skirmish(10, 1);
        assert_eq!(sim.store().len(), 20);
        assert_eq!(sim.unit("k3").unwrap().abilities(), ["firebolt", "mend"]);
    }
}
