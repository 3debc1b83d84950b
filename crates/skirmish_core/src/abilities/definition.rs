//! Ability content: definitions and effect kinds.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::params::Param;
use crate::environment::{TerrainKind, WeatherKind};
use crate::math::{to_fixed, Vec2Fixed};
use crate::unit::{Meta, Team, UnitSpec};

fn physical() -> String {
    "physical".to_string()
}

fn one() -> Param {
    Param::Number(1.0)
}

fn yes() -> bool {
    true
}

fn bolt() -> String {
    "bolt".to_string()
}

fn spark() -> String {
    "spark".to_string()
}

const fn default_lifetime() -> u32 {
    60
}

const fn default_particle_lifetime() -> u32 {
    20
}

/// Where an ability is aimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    /// Literal field position.
    Point {
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },
    /// `"self"`, `"target"`, `"self.pos"` or an expression.
    Text(String),
}

/// One ability as authored in content files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDef {
    /// Unique name units refer to.
    pub name: String,
    /// Ticks between uses.
    #[serde(default)]
    pub cooldown: u64,
    /// Lifetime cap on uses.
    #[serde(default, rename = "maxUses", alias = "max_uses")]
    pub max_uses: Option<u32>,
    /// Target selector; defaults to `"target"`.
    #[serde(default)]
    pub target: Option<TargetSpec>,
    /// Boolean expression gating the ability; always true when absent.
    #[serde(default)]
    pub trigger: Option<String>,
    /// Effects applied to every resolved target, in order.
    pub effects: Vec<Effect>,
}

impl AbilityDef {
    /// Every expression source in the definition.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(trigger) = &self.trigger {
            out.push(trigger.as_str());
        }
        if let Some(TargetSpec::Text(text)) = &self.target {
            if !matches!(text.as_str(), "self" | "target" | "self.pos") {
                out.push(text.as_str());
            }
        }
        for effect in &self.effects {
            for param in effect.params() {
                param.sources(&mut out);
            }
        }
        out
    }
}

/// A unit created by `summon` or `deploy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTemplate {
    /// Sprite identifier.
    pub sprite: String,
    /// Hit points.
    pub hp: i32,
    /// Base damage.
    #[serde(default)]
    pub damage: i32,
    /// Mass; defaults to 1.
    #[serde(default)]
    pub mass: Option<f64>,
    /// Team; defaults to the caster's.
    #[serde(default)]
    pub team: Option<Team>,
    /// Ability names.
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Initial metadata.
    #[serde(default)]
    pub meta: Meta,
}

impl UnitTemplate {
    /// Spec for a copy at `position`, defaulting to `team`.
    #[must_use]
    pub fn to_spec(&self, position: Vec2Fixed, team: Team) -> UnitSpec {
        let mut spec = UnitSpec::new(self.sprite.clone(), position)
            .with_hp(self.hp)
            .with_damage(self.damage)
            .with_team(self.team.unwrap_or(team));
        if let Some(mass) = self.mass {
            spec = spec.with_mass(to_fixed(mass));
        }
        spec.abilities.clone_from(&self.abilities);
        spec.tags.clone_from(&self.tags);
        spec.meta.clone_from(&self.meta);
        spec
    }
}

/// Launch parameters shared by `projectile` and `multi_projectile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileEffect {
    /// Damage on impact.
    pub damage: Param,
    /// Cells per tick.
    #[serde(default = "one")]
    pub speed: Param,
    /// Damage aspect.
    #[serde(default = "physical")]
    pub aspect: String,
    /// Type tag.
    #[serde(default = "bolt")]
    pub kind: String,
    /// Collision radius; defaults to 0.25.
    #[serde(default)]
    pub radius: Option<Param>,
    /// Ticks in flight.
    #[serde(default = "default_lifetime")]
    pub lifetime: u32,
    /// Splash radius on impact.
    #[serde(default)]
    pub explode_radius: Option<Param>,
    /// Number of shots (`multi_projectile` only); defaults to 3.
    #[serde(default)]
    pub count: Option<Param>,
    /// Fan width in degrees (`multi_projectile` only); defaults to 30.
    #[serde(default)]
    pub spread: Option<Param>,
}

/// Metadata applied by buffs and debuffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPatch {
    /// Keys to set.
    #[serde(default)]
    pub meta: BTreeMap<String, Param>,
    /// Ticks until every key is removed again; permanent when absent.
    #[serde(default)]
    pub duration: Option<Param>,
}

/// The closed set of effect kinds.
///
/// Content naming any other `type` fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Damage the target.
    Damage {
        /// Amount.
        amount: Param,
        /// Aspect.
        #[serde(default = "physical")]
        aspect: String,
    },
    /// Heal the target, or allies around it when `radius` is set.
    Heal {
        /// Amount.
        amount: Param,
        /// Area radius.
        #[serde(default)]
        radius: Option<Param>,
    },
    /// Area damage with falloff against enemies of the caster.
    Aoe {
        /// Radius.
        radius: Param,
        /// Damage at the centre.
        damage: Param,
        /// Aspect.
        #[serde(default = "physical")]
        aspect: String,
        /// Metadata applied to every unit hit.
        #[serde(default)]
        meta: BTreeMap<String, Param>,
    },
    /// One projectile toward the target.
    Projectile(ProjectileEffect),
    /// A fan of projectiles centred on the target direction.
    MultiProjectile(ProjectileEffect),
    /// Damage enemies inside a cone toward the target.
    Cone {
        /// Cone length.
        range: Param,
        /// Full opening angle in degrees.
        angle: Param,
        /// Damage per unit.
        damage: Param,
        /// Aspect.
        #[serde(default = "physical")]
        aspect: String,
    },
    /// Damage enemies along a line toward the target.
    Line {
        /// Line length.
        length: Param,
        /// Line width.
        #[serde(default = "one")]
        width: Param,
        /// Damage per unit.
        damage: Param,
        /// Aspect.
        #[serde(default = "physical")]
        aspect: String,
    },
    /// Timed metadata on the target, usually an ally.
    Buff(StatusPatch),
    /// Timed metadata on the target, usually an enemy.
    Debuff(StatusPatch),
    /// Timed metadata on everyone on one side within a radius.
    AreaBuff {
        /// Radius.
        radius: Param,
        /// Keys to set.
        #[serde(default)]
        meta: BTreeMap<String, Param>,
        /// Ticks until removal.
        #[serde(default)]
        duration: Option<Param>,
        /// Allies (default) or enemies of the caster.
        #[serde(default = "yes")]
        allies: bool,
    },
    /// Spawn copies of a unit around the target.
    Summon {
        /// Template.
        unit: UnitTemplate,
        /// Copies.
        #[serde(default = "one")]
        count: Param,
    },
    /// Place one unit exactly at the target.
    Deploy {
        /// Template.
        unit: UnitTemplate,
    },
    /// Pull the target next to the caster.
    Grapple {
        /// Ticks the target stays rooted afterwards.
        #[serde(default)]
        duration: Option<Param>,
    },
    /// Root the target.
    Pin {
        /// Ticks.
        duration: Param,
    },
    /// Paint terrain around the target.
    Terrain {
        /// Kind.
        terrain: TerrainKind,
        /// Radius.
        radius: Param,
        /// Ticks until it fades.
        duration: Param,
    },
    /// Cosmetic particle burst at the target.
    Particles {
        /// Type tag.
        #[serde(default = "spark")]
        kind: String,
        /// Number of particles.
        count: Param,
        /// Random velocity per axis.
        #[serde(default)]
        spread: Option<Param>,
        /// Ticks to live.
        #[serde(default = "default_particle_lifetime")]
        lifetime: u32,
    },
    /// Start a weather front.
    Weather {
        /// Kind.
        weather: WeatherKind,
        /// Strength in `[0, 1]`.
        #[serde(default = "one")]
        intensity: Param,
        /// Ticks.
        duration: Param,
    },
    /// Move the caster to the target.
    Teleport,
    /// Throw the target away from the caster.
    Toss {
        /// Throw distance.
        distance: Param,
        /// Landing damage.
        #[serde(default)]
        damage: Option<Param>,
    },
    /// Leap to the target, airborne on the way.
    Jump {
        /// Airborne ticks; defaults to 1.
        #[serde(default)]
        duration: Option<Param>,
    },
    /// Burrow the caster.
    Burrow {
        /// Ticks underground.
        duration: Param,
    },
    /// Bring the target over to the caster's team.
    Tame {
        /// Ticks before it reverts; permanent when absent.
        #[serde(default)]
        duration: Option<Param>,
    },
    /// Stop the target from starting fights.
    Calm {
        /// Ticks.
        duration: Param,
    },
    /// Root every enemy around the target.
    Entangle {
        /// Radius.
        radius: Param,
        /// Ticks.
        duration: Param,
    },
    /// Remove harmful statuses from the target.
    Cleanse,
    /// Mark every enemy around the target as revealed.
    Reveal {
        /// Radius.
        radius: Param,
        /// Ticks.
        duration: Param,
    },
    /// Push the target, or every enemy around it, away.
    Knockback {
        /// Push strength.
        force: Param,
        /// Area radius.
        #[serde(default)]
        radius: Option<Param>,
    },
}

impl Effect {
    /// Kind name as written in content.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Damage { .. } => "damage",
            Effect::Heal { .. } => "heal",
            Effect::Aoe { .. } => "aoe",
            Effect::Projectile(_) => "projectile",
            Effect::MultiProjectile(_) => "multi_projectile",
            Effect::Cone { .. } => "cone",
            Effect::Line { .. } => "line",
            Effect::Buff(_) => "buff",
            Effect::Debuff(_) => "debuff",
            Effect::AreaBuff { .. } => "area_buff",
            Effect::Summon { .. } => "summon",
            Effect::Deploy { .. } => "deploy",
            Effect::Grapple { .. } => "grapple",
            Effect::Pin { .. } => "pin",
            Effect::Terrain { .. } => "terrain",
            Effect::Particles { .. } => "particles",
            Effect::Weather { .. } => "weather",
            Effect::Teleport => "teleport",
            Effect::Toss { .. } => "toss",
            Effect::Jump { .. } => "jump",
            Effect::Burrow { .. } => "burrow",
            Effect::Tame { .. } => "tame",
            Effect::Calm { .. } => "calm",
            Effect::Entangle { .. } => "entangle",
            Effect::Cleanse => "cleanse",
            Effect::Reveal { .. } => "reveal",
            Effect::Knockback { .. } => "knockback",
        }
    }

    /// Every parameter of the effect.
    #[must_use]
    pub fn params(&self) -> Vec<&Param> {
        match self {
            Effect::Damage { amount, .. } | Effect::Heal { amount, radius: None } => vec![amount],
            Effect::Heal {
                amount,
                radius: Some(radius),
            } => vec![amount, radius],
            Effect::Aoe {
                radius,
                damage,
                meta,
                ..
            } => [radius, damage].into_iter().chain(meta.values()).collect(),
            Effect::Projectile(p) | Effect::MultiProjectile(p) => [&p.damage, &p.speed]
                .into_iter()
                .chain(p.radius.iter())
                .chain(p.explode_radius.iter())
                .chain(p.count.iter())
                .chain(p.spread.iter())
                .collect(),
            Effect::Cone {
                range,
                angle,
                damage,
                ..
            } => vec![range, angle, damage],
            Effect::Line {
                length,
                width,
                damage,
                ..
            } => vec![length, width, damage],
            Effect::Buff(patch) | Effect::Debuff(patch) => {
                patch.meta.values().chain(patch.duration.iter()).collect()
            }
            Effect::AreaBuff {
                radius,
                meta,
                duration,
                ..
            } => std::iter::once(radius)
                .chain(meta.values())
                .chain(duration.iter())
                .collect(),
            Effect::Summon { count, .. } => vec![count],
            Effect::Deploy { .. } | Effect::Teleport | Effect::Cleanse => Vec::new(),
            Effect::Grapple { duration } | Effect::Jump { duration } | Effect::Tame { duration } => {
                duration.iter().collect()
            }
            Effect::Pin { duration } | Effect::Burrow { duration } | Effect::Calm { duration } => {
                vec![duration]
            }
            Effect::Terrain {
                radius, duration, ..
            }
            | Effect::Entangle { radius, duration }
            | Effect::Reveal { radius, duration } => vec![radius, duration],
            Effect::Particles { count, spread, .. } => {
                std::iter::once(count).chain(spread.iter()).collect()
            }
            Effect::Weather {
                intensity,
                duration,
                ..
            } => vec![intensity, duration],
            Effect::Toss { distance, damage } => {
                std::iter::once(distance).chain(damage.iter()).collect()
            }
            Effect::Knockback { force, radius } => {
                std::iter::once(force).chain(radius.iter()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_json() {
        let def: AbilityDef = serde_json::from_str(
            r#"{
                "name": "fireball",
                "cooldown": 30,
                "maxUses": 2,
                "target": "closest.enemy(8)",
                "trigger": "count.enemies(8) > 0",
                "effects": [
                    {"type": "projectile", "damage": 6, "speed": 1.5, "explode_radius": 2},
                    {"type": "terrain", "terrain": "fire", "radius": 1, "duration": 20},
                    {"type": "teleport"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(def.max_uses, Some(2));
        assert_eq!(def.effects.len(), 3);
        assert_eq!(def.effects[0].kind(), "projectile");
        assert_eq!(def.effects[2], Effect::Teleport);
        assert_eq!(def.sources(), vec!["count.enemies(8) > 0", "closest.enemy(8)"]);
    }

    #[test]
    fn test_unknown_effect_type_rejected() {
        let result: Result<Effect, _> = serde_json::from_str(r#"{"type": "explode", "damage": 3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_literal_point_target() {
        let def: AbilityDef = serde_json::from_str(
            r#"{"name": "drop", "target": {"x": 3, "y": 4}, "effects": [{"type": "cleanse"}]}"#,
        )
        .unwrap();
        assert_eq!(def.target, Some(TargetSpec::Point { x: 3.0, y: 4.0 }));
        assert!(def.sources().is_empty());
    }

    #[test]
    fn test_template_defaults_to_caster_team() {
        let template: UnitTemplate =
            serde_json::from_str(r#"{"sprite": "wolf", "hp": 6, "damage": 2}"#).unwrap();
        let spec = template.to_spec(Vec2Fixed::from_ints(1, 2), Team::Hostile);
        assert_eq!(spec.team, Team::Hostile);
        assert_eq!(spec.hp, 6);
        assert_eq!(spec.max_hp, Some(6));
    }
}
