//! Unit data definitions.
//!
//! A unit is split across two representations: hot fixed-width fields
//! that live in the [`UnitStore`](crate::store::UnitStore) arrays, and
//! cold per-id data ([`ColdData`]) kept in a side-table. Everything here
//! is pure data with no behavior beyond small helpers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as MetaValue;

use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Stable string identifier of a unit.
pub type UnitId = String;

/// Free-form metadata bag: status flags, timers, ability scratch data.
///
/// Ordered so that iteration (and therefore hashing) is deterministic.
pub type Meta = BTreeMap<String, MetaValue>;

/// A shallow metadata patch. `None` deletes the key.
pub type MetaPatch = BTreeMap<String, Option<MetaValue>>;

/// Team allegiance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Belongs to no side; never attacked by default rules.
    #[default]
    Neutral,
    /// Player side.
    Friendly,
    /// Opposing side.
    Hostile,
}

impl Team {
    /// Whether units of the two teams fight each other.
    #[must_use]
    pub const fn is_enemy_of(self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Friendly, Team::Hostile) | (Team::Hostile, Team::Friendly)
        )
    }

    /// Whether units of the two teams are on the same (non-neutral) side.
    #[must_use]
    pub const fn is_ally_of(self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Friendly, Team::Friendly) | (Team::Hostile, Team::Hostile)
        )
    }

    /// Lowercase name used by expressions and metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Team::Neutral => "neutral",
            Team::Friendly => "friendly",
            Team::Hostile => "hostile",
        }
    }

    /// Parse the lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "neutral" => Some(Team::Neutral),
            "friendly" => Some(Team::Friendly),
            "hostile" => Some(Team::Hostile),
            _ => None,
        }
    }
}

/// Behavioral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Standing still.
    #[default]
    Idle,
    /// Moving.
    Walk,
    /// Engaged in combat.
    Attack,
    /// Killed; removed by the cleanup rule.
    Dead,
}

impl UnitState {
    /// Lowercase name used by expressions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            UnitState::Idle => "idle",
            UnitState::Walk => "walk",
            UnitState::Attack => "attack",
            UnitState::Dead => "dead",
        }
    }
}

fn default_mass() -> Fixed {
    Fixed::from_num(1)
}

/// Parameters for adding a unit to the store.
///
/// Doubles as the scenario-file representation of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Explicit id; the store generates `"{sprite}_{n}"` when absent.
    #[serde(default)]
    pub id: Option<UnitId>,
    /// Sprite identifier (also the unit "type" for diagnostics).
    pub sprite: String,
    /// Initial position.
    pub position: Vec2Fixed,
    /// Starting hit points.
    pub hp: i32,
    /// Maximum hit points; defaults to `hp`.
    #[serde(default)]
    pub max_hp: Option<i32>,
    /// Base melee damage.
    #[serde(default)]
    pub damage: i32,
    /// Mass used by knockback and separation.
    #[serde(with = "fixed_serde", default = "default_mass")]
    pub mass: Fixed,
    /// Allegiance.
    #[serde(default)]
    pub team: Team,
    /// Initial state.
    #[serde(default)]
    pub state: UnitState,
    /// Names of abilities in the ability library.
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Tag set.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Initial metadata.
    #[serde(default)]
    pub meta: Meta,
}

impl UnitSpec {
    /// Create a spec with 1 hp and no damage at the given position.
    #[must_use]
    pub fn new(sprite: impl Into<String>, position: Vec2Fixed) -> Self {
        Self {
            id: None,
            sprite: sprite.into(),
            position,
            hp: 1,
            max_hp: None,
            damage: 0,
            mass: default_mass(),
            team: Team::Neutral,
            state: UnitState::Idle,
            abilities: Vec::new(),
            tags: BTreeSet::new(),
            meta: Meta::new(),
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the team.
    pub fn with_team(mut self, team: Team) -> Self {
        self.team = team;
        self
    }

    /// Set current and maximum hit points.
    pub fn with_hp(mut self, hp: i32) -> Self {
        self.hp = hp;
        self.max_hp = Some(hp);
        self
    }

    /// Set base damage.
    pub fn with_damage(mut self, damage: i32) -> Self {
        self.damage = damage;
        self
    }

    /// Set mass.
    pub fn with_mass(mut self, mass: Fixed) -> Self {
        self.mass = mass;
        self
    }

    /// Append an ability name.
    pub fn with_ability(mut self, name: impl Into<String>) -> Self {
        self.abilities.push(name.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set a metadata key.
    pub fn with_meta(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Cold per-unit data, stored once per id regardless of slot reuse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColdData {
    /// Sprite identifier.
    pub sprite: String,
    /// Ability names.
    pub abilities: Vec<String>,
    /// Tag set.
    pub tags: BTreeSet<String>,
    /// Free-form metadata.
    pub meta: Meta,
    /// Tick at which each ability was last used.
    pub last_used: BTreeMap<String, u64>,
    /// Number of times each ability has been used.
    pub uses: BTreeMap<String, u32>,
}

impl ColdData {
    /// Apply a shallow metadata patch: `Some` overwrites, `None` deletes.
    pub fn merge_meta(&mut self, patch: &MetaPatch) {
        for (key, value) in patch {
            match value {
                Some(v) => {
                    self.meta.insert(key.clone(), v.clone());
                }
                None => {
                    self.meta.remove(key);
                }
            }
        }
    }

    /// Whether a metadata flag is set to a truthy value.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        match self.meta.get(key) {
            None | Some(MetaValue::Null) => false,
            Some(MetaValue::Bool(b)) => *b,
            Some(MetaValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(MetaValue::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Numeric metadata value, if present and numeric.
    #[must_use]
    pub fn meta_number(&self, key: &str) -> Option<f64> {
        self.meta.get(key).and_then(MetaValue::as_f64)
    }

    /// Whether a timed status is active at `now`.
    ///
    /// A status is active while `meta["{name}_until"]` lies in the future,
    /// or when the bare flag is set without a timer.
    #[must_use]
    pub fn status_active(&self, name: &str, now: u64) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let now = now as f64;
        match self.meta_number(&status::until_key(name)) {
            Some(until) => until > now,
            None => self.flag(name),
        }
    }
}

/// Names of the timed statuses the built-in rules understand.
pub mod status {
    /// Cannot act.
    pub const STUNNED: &str = "stunned";
    /// Cannot move.
    pub const ROOTED: &str = "rooted";
    /// Underground and untargetable.
    pub const BURROWED: &str = "burrowed";
    /// In the air; ignores melee.
    pub const AIRBORNE: &str = "airborne";
    /// Takes fire damage every tick.
    pub const BURNING: &str = "burning";
    /// Takes poison damage every tick.
    pub const POISONED: &str = "poisoned";
    /// Moves at half speed.
    pub const SLOWED: &str = "slowed";
    /// Will not start fights.
    pub const CALM: &str = "calm";
    /// Visible through stealth.
    pub const REVEALED: &str = "revealed";
    /// Fighting for another team.
    pub const CHARMED: &str = "charmed";

    /// Metadata key holding the expiry tick of `name`.
    #[must_use]
    pub fn until_key(name: &str) -> String {
        format!("{name}_until")
    }
}

/// Owned, frozen copy of one unit taken at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    /// Store slot the unit occupied when the snapshot was taken.
    pub slot: usize,
    /// Stable id.
    pub id: UnitId,
    /// Position.
    pub position: Vec2Fixed,
    /// Pending move intent.
    pub intent: Vec2Fixed,
    /// Current hit points.
    pub hp: i32,
    /// Maximum hit points.
    pub max_hp: i32,
    /// Base damage.
    pub damage: i32,
    /// Mass.
    pub mass: Fixed,
    /// Team.
    pub team: Team,
    /// State.
    pub state: UnitState,
    /// Cold data copy.
    pub cold: ColdData,
}

impl UnitSnapshot {
    /// Alive means positive hp and not in the dead state.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.hp > 0 && self.state != UnitState::Dead
    }

    /// Whether the unit carries a tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.cold.tags.contains(tag)
    }

    /// See [`ColdData::status_active`].
    #[must_use]
    pub fn status_active(&self, name: &str, now: u64) -> bool {
        self.cold.status_active(name, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_team_relations() {
        assert!(Team::Friendly.is_enemy_of(Team::Hostile));
        assert!(Team::Hostile.is_enemy_of(Team::Friendly));
        assert!(!Team::Neutral.is_enemy_of(Team::Hostile));
        assert!(Team::Hostile.is_ally_of(Team::Hostile));
        assert!(!Team::Neutral.is_ally_of(Team::Neutral));
    }

    #[test]
    fn test_merge_meta_deletes_none_keys() {
        let mut cold = ColdData::default();
        cold.meta.insert("stunned".into(), json!(true));
        cold.meta.insert("charges".into(), json!(3));

        let mut patch = MetaPatch::new();
        patch.insert("stunned".into(), None);
        patch.insert("charges".into(), Some(json!(2)));
        patch.insert("marked".into(), Some(json!("yes")));
        cold.merge_meta(&patch);

        assert!(!cold.meta.contains_key("stunned"));
        assert_eq!(cold.meta["charges"], json!(2));
        assert!(cold.flag("marked"));
    }

    #[test]
    fn test_status_timer() {
        let mut cold = ColdData::default();
        cold.meta.insert("stunned_until".into(), json!(10));
        assert!(cold.status_active(status::STUNNED, 9));
        assert!(!cold.status_active(status::STUNNED, 10));

        cold.meta.insert("rooted".into(), json!(true));
        assert!(cold.status_active(status::ROOTED, 1_000));
        assert!(!cold.status_active(status::BURNING, 0));
    }

    #[test]
    fn test_unit_spec_from_ron() {
        let spec: UnitSpec = ron::from_str(
            r#"(
                sprite: "goblin",
                position: (x: 3.0, y: 4.5),
                hp: 12,
                team: hostile,
                abilities: ["slash"],
            )"#,
        )
        .unwrap();

        assert_eq!(spec.sprite, "goblin");
        assert_eq!(spec.position, Vec2Fixed::from_f64(3.0, 4.5));
        assert_eq!(spec.team, Team::Hostile);
        assert_eq!(spec.mass, Fixed::from_num(1));
        assert_eq!(spec.abilities, vec!["slash".to_string()]);
    }
}
