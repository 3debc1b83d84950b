//! Core tick loop.
//!
//! The simulation owns the world, the registered rules and the command
//! pipeline, and advances everything one tick at a time.
//!
//! # Determinism
//!
//! All operations in this module are fully deterministic:
//! - Hot unit data is fixed-point ([`Fixed`])
//! - The only random source is the seeded [`DeterministicRng`](crate::rng::DeterministicRng)
//! - Units are always visited in slot order
//! - Same inputs always produce same outputs
//!
//! # Example
//!
//! ```
//! use skirmish_core::config::SimConfig;
//! use skirmish_core::math::Vec2Fixed;
//! use skirmish_core::rules::MeleeCombat;
//! use skirmish_core::simulation::Simulation;
//! use skirmish_core::unit::{Team, UnitSpec};
//!
//! let mut sim = Simulation::new(SimConfig::default()).unwrap();
//! sim.add_rule(MeleeCombat);
//! sim.spawn(UnitSpec::new("knight", Vec2Fixed::from_ints(1, 1)).with_hp(10).with_damage(2).with_team(Team::Friendly)).unwrap();
//! sim.spawn(UnitSpec::new("orc", Vec2Fixed::from_ints(2, 1)).with_hp(10).with_damage(3).with_team(Team::Hostile)).unwrap();
//!
//! let events = sim.tick();
//! assert_eq!(events.report.damage.len(), 2);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde_json::json;

use crate::abilities::{is_ready, Abilities, AbilityLibrary};
use crate::command::{Command, CommandKind, Event};
use crate::config::{Scenario, SimConfig};
use crate::context::{FrozenUnits, TickContext};
use crate::environment::TerrainKind;
use crate::error::{Result, SimError};
use crate::math::{Fixed, Vec2Fixed};
use crate::pipeline::{DrainReport, Pipeline};
use crate::proxy::UnitRef;
use crate::rules::{Cleanup, Hunt, MeleeCombat, Rule, StatusEffects};
use crate::spatial::SpatialGrid;
use crate::store::UnitStore;
use crate::unit::{status, MetaPatch, UnitId, UnitSpec};
use crate::world::World;

/// Ticks a unit keeps burning after leaving fire terrain.
const BURN_TICKS: u64 = 3;

/// Ticks a unit stays slowed after leaving mud.
const MUD_TICKS: u64 = 2;

/// What happened during one tick (or several, when merged).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEvents {
    /// Tick that was processed.
    pub tick: u64,
    /// Everything the pipeline did.
    pub report: DrainReport,
    /// Projectiles that struck or detonated.
    pub impacts: usize,
}

impl TickEvents {
    /// Fold a later tick into this summary.
    pub fn merge(&mut self, other: TickEvents) {
        self.tick = other.tick;
        self.impacts += other.impacts;
        self.report.merge(other.report);
    }
}

/// The combat kernel.
///
/// Each tick runs these steps in order:
/// 1. **Snapshot** - take the dirty set, re-bucket the spatial grid and
///    refresh the frozen unit view
/// 2. **Rules** - every rule in registration order, each reading the same
///    frozen view; its commands and events are queued
/// 3. **Drain** - the pipeline executes commands and resolves events
/// 4. **Separation** - overlapping units are pushed apart by mass and the
///    pipeline drains again
/// 5. **Physics** - projectiles, particles and the environment advance;
///    impacts and terrain effects are queued for the next tick
pub struct Simulation {
    config: SimConfig,
    world: World,
    pipeline: Pipeline,
    rules: Vec<Box<dyn Rule>>,
    frozen: FrozenUnits,
    grid: SpatialGrid,
    library: Rc<AbilityLibrary>,
    tick: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("units", &self.world.store.len())
            .field("rules", &self.rule_names())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Create an empty simulation with no rules.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidState`] if the configuration is unusable.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let grid = SpatialGrid::new(
            config.field_width,
            config.field_height,
            config.cell_size,
            config.capacity,
        );
        Ok(Self {
            world: World::new(&config),
            pipeline: Pipeline::new(config.max_drain_iterations),
            rules: Vec::new(),
            frozen: FrozenUnits::default(),
            grid,
            library: Rc::new(AbilityLibrary::new()),
            config,
            tick: 0,
        })
    }

    /// Create a simulation with the built-in rules registered:
    /// status effects, hunt, melee, abilities and cleanup.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_default_rules(config: SimConfig, library: AbilityLibrary) -> Result<Self> {
        let mut sim = Self::new(config)?;
        sim.library = Rc::new(library);
        sim.add_rule(StatusEffects);
        sim.add_rule(Hunt);
        sim.add_rule(MeleeCombat);
        sim.add_rule(Abilities::new(Rc::clone(&sim.library)));
        sim.add_rule(Cleanup);
        Ok(sim)
    }

    /// Build from a scenario and its ability library.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidAbility`] if an expression in the library does
    /// not parse, [`SimError::UnknownAbility`] if a unit lists an ability
    /// the library lacks, and any spawn failure.
    pub fn from_scenario(scenario: &Scenario, library: AbilityLibrary) -> Result<Self> {
        library.validate()?;
        library.check_units(&scenario.units)?;
        let mut sim = Self::with_default_rules(scenario.config.clone(), library)?;
        for spec in &scenario.units {
            sim.spawn(spec.clone())?;
        }
        tracing::info!(
            scenario = %scenario.name,
            units = sim.world.store.len(),
            "Scenario loaded"
        );
        Ok(sim)
    }

    /// Register a rule after those already present.
    pub fn add_rule(&mut self, rule: impl Rule + 'static) {
        self.rules.push(Box::new(rule));
    }

    /// Names of the registered rules, in execution order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Add a unit immediately.
    ///
    /// # Errors
    ///
    /// [`SimError::CapacityExceeded`] when the store is full, or
    /// [`SimError::DuplicateUnitId`].
    pub fn spawn(&mut self, spec: UnitSpec) -> Result<UnitId> {
        let slot = self.world.store.add(spec)?;
        self.world
            .store
            .at(slot)
            .map(|u| u.id().to_string())
            .ok_or(SimError::SlotOutOfRange(slot))
    }

    /// Remove a unit immediately.
    ///
    /// # Errors
    ///
    /// [`SimError::UnitNotFound`] if no such unit is active.
    pub fn despawn(&mut self, id: &str) -> Result<()> {
        self.world
            .store
            .remove_by_id(id)
            .map(|_| ())
            .ok_or_else(|| SimError::UnitNotFound(id.to_string()))
    }

    /// Queue a command for the next drain.
    pub fn enqueue(&mut self, command: Command) {
        self.pipeline.enqueue(command);
    }

    /// Queue an event for the next drain.
    pub fn enqueue_event(&mut self, event: Event) {
        self.pipeline.enqueue_event(event);
    }

    /// Drain the pipeline outside the tick loop.
    pub fn drain(&mut self) -> DrainReport {
        self.pipeline.drain(&mut self.world, self.tick)
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) -> TickEvents {
        let now = self.tick;

        // 1. Snapshot
        let dirty = self.world.store.take_dirty();
        self.grid.sync(&self.world.store, &dirty);
        self.frozen.refresh(&self.world.store, &dirty);

        // 2. Rules
        for rule in &mut self.rules {
            let mut ctx = TickContext::new(&mut self.world, &self.frozen, &self.grid, &self.config, now);
            let mut commands = rule.execute(&mut ctx);
            let (queued, events) = ctx.into_queued();
            commands.extend(queued);
            tracing::trace!(
                rule = rule.name(),
                commands = commands.len(),
                events = events.len(),
                "Rule executed"
            );
            self.pipeline.enqueue_all(commands);
            for event in events {
                self.pipeline.enqueue_event(event);
            }
        }

        // 3. Drain
        let mut report = self.pipeline.drain(&mut self.world, now);

        // 4. Separation
        let moved = self.world.store.dirty().clone();
        self.grid.sync(&self.world.store, &moved);
        let pushes = self.separation();
        if !pushes.is_empty() {
            self.pipeline.enqueue_all(pushes);
            report.merge(self.pipeline.drain(&mut self.world, now));
        }

        // 5. Physics
        let impacts = self.step_projectiles();
        self.world.particles.step();
        self.world.environment.step(now);
        let terrain = self.terrain_effects(now);
        self.pipeline.enqueue_all(terrain);

        self.tick += 1;

        #[cfg(feature = "debug-validation")]
        if let Err(e) = self.world.store.check_consistency() {
            tracing::error!(tick = self.tick, "Unit store inconsistent: {e}");
        }

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        TickEvents {
            tick: now,
            report,
            impacts,
        }
    }

    /// Run `ticks` ticks and return the merged summary.
    pub fn run(&mut self, ticks: u64) -> TickEvents {
        let mut total = TickEvents::default();
        for _ in 0..ticks {
            let events = self.tick();
            total.merge(events);
        }
        total
    }

    /// Mass-weighted push for every pair of living units closer than the
    /// separation radius, summed into one move per unit.
    fn separation(&self) -> Vec<Command> {
        let radius = self.config.separation_radius;
        if radius <= Fixed::ZERO {
            return Vec::new();
        }
        let store = &self.world.store;
        let half = Fixed::from_num(0.5);
        let mut push: BTreeMap<usize, Vec2Fixed> = BTreeMap::new();

        for (a, b) in self.grid.neighbor_pairs(store, radius) {
            let (Some(ua), Some(ub)) = (store.at(a), store.at(b)) else {
                continue;
            };
            if !ua.is_alive() || !ub.is_alive() {
                continue;
            }
            let delta = ub.position() - ua.position();
            let distance = delta.length();
            if distance >= radius {
                continue;
            }
            let dir = if distance == Fixed::ZERO {
                Vec2Fixed::from_ints(1, 0)
            } else {
                delta.normalize()
            };
            let overlap = radius - distance;
            let total = ua.mass() + ub.mass();
            let (share_a, share_b) = if total > Fixed::ZERO {
                (ub.mass() / total, ua.mass() / total)
            } else {
                (half, half)
            };
            let entry = push.entry(a).or_insert(Vec2Fixed::ZERO);
            *entry = *entry - dir.scale(overlap * share_a);
            let entry = push.entry(b).or_insert(Vec2Fixed::ZERO);
            *entry = *entry + dir.scale(overlap * share_b);
        }

        push.into_iter()
            .filter(|(_, delta)| *delta != Vec2Fixed::ZERO)
            .filter_map(|(slot, delta)| Some(Command::move_by(store.at(slot)?.id(), delta)))
            .collect()
    }

    /// Advance projectiles and queue their hits for the next drain.
    fn step_projectiles(&mut self) -> usize {
        let (width, height) = self.world.field;
        let impacts = self.world.projectiles.step(&self.world.store, width, height);
        let count = impacts.len();
        for impact in impacts {
            let command = if impact.explode_radius > Fixed::ZERO {
                let mut command = Command::aoe(impact.position, impact.explode_radius, impact.damage, impact.aspect);
                if let CommandKind::Aoe { exclude_team, .. } = &mut command.kind {
                    *exclude_team = Some(impact.team);
                }
                command
            } else if let Some(target) = impact.target {
                Command::damage(target, impact.damage, impact.aspect)
            } else {
                continue;
            };
            tracing::trace!(kind = %impact.kind, "Projectile impact");
            self.pipeline.enqueue(match impact.source {
                Some(source) => command.from_unit(source),
                None => command,
            });
        }
        count
    }

    /// Status changes caused by the terrain under each living unit.
    fn terrain_effects(&self, now: u64) -> Vec<Command> {
        let environment = &self.world.environment;
        if !environment.is_enabled() {
            return Vec::new();
        }
        let mut commands = Vec::new();
        for unit in self.world.store.iter().filter(UnitRef::is_alive) {
            let patch: MetaPatch = match environment.terrain_at(unit.position()) {
                Some(TerrainKind::Fire) => {
                    [(status::until_key(status::BURNING), Some(json!(now.saturating_add(BURN_TICKS))))].into()
                }
                Some(TerrainKind::Water) if unit.cold().status_active(status::BURNING, now) => [
                    (status::BURNING.to_string(), None),
                    (status::until_key(status::BURNING), None),
                ]
                .into(),
                Some(TerrainKind::Mud) => {
                    [(status::until_key(status::SLOWED), Some(json!(now.saturating_add(MUD_TICKS))))].into()
                }
                _ => continue,
            };
            commands.push(Command::meta(unit.id(), patch));
        }
        commands
    }

    /// Ticks processed so far.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The unit store.
    #[must_use]
    pub fn store(&self) -> &UnitStore {
        &self.world.store
    }

    /// All mutable state.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Look up a unit.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<UnitRef<'_>> {
        self.world.store.get(id)
    }

    /// The ability library.
    #[must_use]
    pub fn library(&self) -> &AbilityLibrary {
        &self.library
    }

    /// Commands waiting for the next drain.
    #[must_use]
    pub fn pending_commands(&self) -> &[Command] {
        self.pipeline.pending_commands()
    }

    /// Whether `unit` could fire `ability` at the current tick, ignoring
    /// its trigger.
    ///
    /// # Errors
    ///
    /// [`SimError::UnitNotFound`] or [`SimError::UnknownAbility`].
    pub fn is_ability_ready(&self, unit: &str, ability: &str) -> Result<bool> {
        let unit = self
            .unit(unit)
            .ok_or_else(|| SimError::UnitNotFound(unit.to_string()))?;
        let def = self
            .library
            .get(ability)
            .ok_or_else(|| SimError::UnknownAbility(ability.to_string()))?;
        Ok(is_ready(def, unit.cold(), self.tick))
    }

    /// Compute a hash of the current simulation state.
    ///
    /// Covers the tick, every active unit in slot order (hot fields and
    /// metadata), live projectiles and the RNG state. Two simulations with
    /// equal hashes are, for determinism checks, in the same state.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.world.store.len().hash(&mut hasher);

        for unit in self.world.store.iter() {
            unit.slot().hash(&mut hasher);
            unit.id().hash(&mut hasher);
            unit.position().x.to_bits().hash(&mut hasher);
            unit.position().y.to_bits().hash(&mut hasher);
            unit.hp().hash(&mut hasher);
            unit.max_hp().hash(&mut hasher);
            unit.damage().hash(&mut hasher);
            unit.mass().to_bits().hash(&mut hasher);
            unit.team().hash(&mut hasher);
            unit.state().hash(&mut hasher);
            for (key, value) in unit.meta() {
                key.hash(&mut hasher);
                value.to_string().hash(&mut hasher);
            }
            unit.cold().last_used.hash(&mut hasher);
        }

        self.world.projectiles.hash_into(&mut hasher);
        self.world.rng.state().hash(&mut hasher);

        hasher.finish()
    }
}
