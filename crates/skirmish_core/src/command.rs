//! Commands and events.
//!
//! A [`Command`] is an atomic state mutation; it is the only way rules
//! change the unit store. An [`Event`] describes an occurrence that still
//! needs spatial or team filtering (an explosion, a summon) and is
//! resolved by the pipeline into further commands.

use serde::{Deserialize, Serialize};

use crate::environment::{TerrainKind, WeatherKind};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::pool::{ParticleSpawn, ProjectileSpawn};
use crate::unit::{Meta, MetaPatch, Team, UnitId, UnitSpec, UnitState};

/// Movement requested by a `move` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    /// Relative displacement (`dx`/`dy`).
    By(Vec2Fixed),
    /// Absolute destination (`x`/`y`); teleports use this.
    To(Vec2Fixed),
}

/// Command payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    /// Subtract hit points.
    Damage {
        /// Unit hit.
        target: UnitId,
        /// Raw amount before armor and resistances.
        amount: i32,
        /// Damage aspect (`"physical"`, `"fire"`, ...).
        aspect: String,
    },
    /// Restore hit points, clamped to max hp.
    Heal {
        /// Unit healed.
        target: UnitId,
        /// Amount.
        amount: i32,
    },
    /// Move a unit. Coalesced per unit within a pass.
    Move {
        /// Unit moved.
        unit: UnitId,
        /// Displacement or destination.
        motion: Motion,
    },
    /// Patch metadata and/or state. Coalesced per unit within a pass.
    Meta {
        /// Unit patched.
        unit: UnitId,
        /// Shallow patch; `None` deletes a key.
        #[serde(default)]
        patch: MetaPatch,
        /// New state.
        #[serde(default)]
        state: Option<UnitState>,
    },
    /// Add a unit.
    Spawn {
        /// Unit to add.
        unit: Box<UnitSpec>,
    },
    /// Remove a unit.
    Remove {
        /// Unit removed.
        unit: UnitId,
    },
    /// Immediate area damage with linear falloff, no team filtering.
    Aoe {
        /// Centre.
        center: Vec2Fixed,
        /// Radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
        /// Damage at the centre.
        damage: i32,
        /// Damage aspect.
        aspect: String,
        /// Units on this team are not hit.
        #[serde(default)]
        exclude_team: Option<Team>,
    },
    /// Launch a projectile.
    Projectile(Box<ProjectileSpawn>),
    /// Emit a burst of particles.
    Particles {
        /// Template for every particle; velocity is the base velocity.
        spawn: ParticleSpawn,
        /// Number of particles.
        count: u32,
        /// Maximum random velocity added per axis.
        #[serde(with = "fixed_serde")]
        spread: Fixed,
    },
    /// Leap to a point and stay airborne for a while.
    Jump {
        /// Unit jumping.
        unit: UnitId,
        /// Landing point.
        to: Vec2Fixed,
        /// Airborne ticks.
        duration: u64,
    },
    /// Throw a unit to a point, damaging it on landing.
    Toss {
        /// Unit thrown.
        unit: UnitId,
        /// Landing point.
        to: Vec2Fixed,
        /// Landing damage.
        damage: i32,
    },
    /// Burrow underground; burrowed units cannot be targeted.
    Burrow {
        /// Unit burrowing.
        unit: UnitId,
        /// Ticks underground.
        duration: u64,
    },
    /// Change a unit's allegiance. `duration: None` makes it permanent.
    Charm {
        /// Unit charmed.
        unit: UnitId,
        /// New team.
        team: Team,
        /// Ticks until the original team is restored.
        #[serde(default)]
        duration: Option<u64>,
    },
    /// Push a unit away from a point; displacement scales with 1 / mass.
    Knockback {
        /// Unit pushed.
        unit: UnitId,
        /// Point pushed away from.
        origin: Vec2Fixed,
        /// Push strength.
        #[serde(with = "fixed_serde")]
        force: Fixed,
    },
    /// Paint terrain on the environment grid.
    Terrain {
        /// Centre.
        center: Vec2Fixed,
        /// Radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
        /// Terrain kind.
        terrain: TerrainKind,
        /// Ticks until the terrain expires.
        duration: u64,
    },
    /// Start a weather front.
    Weather {
        /// Weather kind.
        weather: WeatherKind,
        /// Strength in `[0, 1]`.
        #[serde(with = "fixed_serde")]
        intensity: Fixed,
        /// Ticks until the front passes.
        duration: u64,
    },
    /// Record an ability use (cooldown timestamp and use count).
    AbilityUsed {
        /// Acting unit.
        unit: UnitId,
        /// Ability name.
        ability: String,
    },
}

impl CommandKind {
    /// Short kind name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Damage { .. } => "damage",
            CommandKind::Heal { .. } => "heal",
            CommandKind::Move { .. } => "move",
            CommandKind::Meta { .. } => "meta",
            CommandKind::Spawn { .. } => "spawn",
            CommandKind::Remove { .. } => "remove",
            CommandKind::Aoe { .. } => "aoe",
            CommandKind::Projectile(_) => "projectile",
            CommandKind::Particles { .. } => "particles",
            CommandKind::Jump { .. } => "jump",
            CommandKind::Toss { .. } => "toss",
            CommandKind::Burrow { .. } => "burrow",
            CommandKind::Charm { .. } => "charm",
            CommandKind::Knockback { .. } => "knockback",
            CommandKind::Terrain { .. } => "terrain",
            CommandKind::Weather { .. } => "weather",
            CommandKind::AbilityUsed { .. } => "ability_used",
        }
    }
}

/// A state mutation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Payload.
    #[serde(flatten)]
    pub kind: CommandKind,
    /// Acting unit, if any.
    #[serde(default)]
    pub source: Option<UnitId>,
    /// Dedupe id; a second command with the same id in one pass is skipped.
    #[serde(default)]
    pub id: Option<String>,
    /// Earliest tick at which the command may run.
    #[serde(default)]
    pub tick: Option<u64>,
}

impl From<CommandKind> for Command {
    fn from(kind: CommandKind) -> Self {
        Self {
            kind,
            source: None,
            id: None,
            tick: None,
        }
    }
}

impl Command {
    /// `damage` command.
    #[must_use]
    pub fn damage(target: impl Into<UnitId>, amount: i32, aspect: impl Into<String>) -> Self {
        CommandKind::Damage {
            target: target.into(),
            amount,
            aspect: aspect.into(),
        }
        .into()
    }

    /// `heal` command.
    #[must_use]
    pub fn heal(target: impl Into<UnitId>, amount: i32) -> Self {
        CommandKind::Heal {
            target: target.into(),
            amount,
        }
        .into()
    }

    /// Relative `move` command.
    #[must_use]
    pub fn move_by(unit: impl Into<UnitId>, delta: Vec2Fixed) -> Self {
        CommandKind::Move {
            unit: unit.into(),
            motion: Motion::By(delta),
        }
        .into()
    }

    /// Absolute `move` command.
    #[must_use]
    pub fn move_to(unit: impl Into<UnitId>, position: Vec2Fixed) -> Self {
        CommandKind::Move {
            unit: unit.into(),
            motion: Motion::To(position),
        }
        .into()
    }

    /// `meta` command carrying a patch.
    #[must_use]
    pub fn meta(unit: impl Into<UnitId>, patch: MetaPatch) -> Self {
        CommandKind::Meta {
            unit: unit.into(),
            patch,
            state: None,
        }
        .into()
    }

    /// `meta` command that only changes state.
    #[must_use]
    pub fn set_state(unit: impl Into<UnitId>, state: UnitState) -> Self {
        CommandKind::Meta {
            unit: unit.into(),
            patch: MetaPatch::new(),
            state: Some(state),
        }
        .into()
    }

    /// `spawn` command.
    #[must_use]
    pub fn spawn(unit: UnitSpec) -> Self {
        CommandKind::Spawn {
            unit: Box::new(unit),
        }
        .into()
    }

    /// `remove` command.
    #[must_use]
    pub fn remove(unit: impl Into<UnitId>) -> Self {
        CommandKind::Remove { unit: unit.into() }.into()
    }

    /// `aoe` command.
    #[must_use]
    pub fn aoe(center: Vec2Fixed, radius: Fixed, damage: i32, aspect: impl Into<String>) -> Self {
        CommandKind::Aoe {
            center,
            radius,
            damage,
            aspect: aspect.into(),
            exclude_team: None,
        }
        .into()
    }

    /// `projectile` command.
    #[must_use]
    pub fn projectile(spawn: ProjectileSpawn) -> Self {
        CommandKind::Projectile(Box::new(spawn)).into()
    }

    /// `knockback` command.
    #[must_use]
    pub fn knockback(unit: impl Into<UnitId>, origin: Vec2Fixed, force: Fixed) -> Self {
        CommandKind::Knockback {
            unit: unit.into(),
            origin,
            force,
        }
        .into()
    }

    /// `ability_used` command.
    #[must_use]
    pub fn ability_used(unit: impl Into<UnitId>, ability: impl Into<String>) -> Self {
        CommandKind::AbilityUsed {
            unit: unit.into(),
            ability: ability.into(),
        }
        .into()
    }

    /// Set the acting unit.
    #[must_use]
    pub fn from_unit(mut self, source: impl Into<UnitId>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the dedupe id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Delay until `tick`.
    #[must_use]
    pub fn at_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Whether the command may run at `now`.
    #[must_use]
    pub fn is_due(&self, now: u64) -> bool {
        self.tick.map_or(true, |t| t <= now)
    }
}

/// What an event is aimed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// A unit; the event is dropped if it no longer exists.
    Unit(UnitId),
    /// A field position.
    Point(Vec2Fixed),
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Area damage with falloff against enemies of the source.
    Aoe {
        /// Radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
        /// Damage at the centre.
        damage: i32,
        /// Damage aspect.
        aspect: String,
    },
    /// Single-target damage; a point target hits the nearest unit under it.
    Damage {
        /// Amount.
        amount: i32,
        /// Damage aspect.
        aspect: String,
    },
    /// Healing of the target, or of the source's allies within `radius`.
    Heal {
        /// Amount.
        amount: i32,
        /// Zero for single-target.
        #[serde(with = "fixed_serde", default)]
        radius: Fixed,
    },
    /// Push enemies of the source away from the target.
    Knockback {
        /// Push strength.
        #[serde(with = "fixed_serde")]
        force: Fixed,
        /// Area radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
    },
    /// Spawn copies of a unit around the target.
    Spawn {
        /// Template.
        unit: Box<UnitSpec>,
        /// Number of copies.
        count: u32,
    },
    /// Paint terrain at the target.
    Terrain {
        /// Terrain kind.
        terrain: TerrainKind,
        /// Radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
        /// Ticks until expiry.
        duration: u64,
    },
    /// Apply the event metadata to units within `radius` on one side of
    /// the source.
    Status {
        /// Area radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
        /// `true` for allies of the source (buffs), `false` for enemies.
        allies: bool,
    },
}

/// An unresolved occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
    /// Unit that caused it.
    #[serde(default)]
    pub source: Option<UnitId>,
    /// Unit or point aimed at.
    pub target: EventTarget,
    /// Extra data merged into every unit the event hits.
    #[serde(default)]
    pub meta: Meta,
}

impl Event {
    /// Create an event with no source and empty metadata.
    #[must_use]
    pub fn new(kind: EventKind, target: EventTarget) -> Self {
        Self {
            kind,
            source: None,
            target,
            meta: Meta::new(),
        }
    }

    /// Set the source unit.
    #[must_use]
    pub fn from_unit(mut self, source: impl Into<UnitId>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Short kind name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Aoe { .. } => "aoe",
            EventKind::Damage { .. } => "damage",
            EventKind::Heal { .. } => "heal",
            EventKind::Knockback { .. } => "knockback",
            EventKind::Spawn { .. } => "spawn",
            EventKind::Terrain { .. } => "terrain",
            EventKind::Status { .. } => "status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let cmd = Command::damage("orc", 5, "fire")
            .from_unit("mage")
            .with_id("hit-1")
            .at_tick(3);
        assert_eq!(cmd.source.as_deref(), Some("mage"));
        assert_eq!(cmd.id.as_deref(), Some("hit-1"));
        assert!(!cmd.is_due(2));
        assert!(cmd.is_due(3));
        assert_eq!(cmd.kind.name(), "damage");
    }

    #[test]
    fn test_command_json_shape() {
        let cmd: Command = serde_json::from_str(
            r#"{"kind": "damage", "target": "orc", "amount": 3, "aspect": "physical", "id": "x"}"#,
        )
        .unwrap();
        assert_eq!(cmd, Command::damage("orc", 3, "physical").with_id("x"));
    }

    #[test]
    fn test_unknown_command_kind_rejected() {
        let result: Result<Command, _> =
            serde_json::from_str(r#"{"kind": "explode", "target": "orc"}"#);
        assert!(result.is_err());
    }
}
