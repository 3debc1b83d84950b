//! Per-tick read API handed to every rule.

use std::collections::{BTreeSet, HashMap};

use crate::command::{Command, Event};
use crate::config::SimConfig;
use crate::environment::{Environment, TerrainKind};
use crate::math::{Fixed, Vec2Fixed};
use crate::pool::{ParticlePool, ProjectilePool};
use crate::rng::DeterministicRng;
use crate::spatial::SpatialGrid;
use crate::store::UnitStore;
use crate::unit::{Team, UnitSnapshot, UnitState};
use crate::world::World;

/// Frozen copy of every active unit, in slot order.
///
/// Refreshed once per tick before any rule runs: fully when units were
/// added or removed since the last refresh, otherwise only for the slots
/// that were mutated. Rules see this copy for the whole tick, so commands
/// queued by an earlier rule never change what a later rule reads.
#[derive(Debug, Clone, Default)]
pub struct FrozenUnits {
    units: Vec<UnitSnapshot>,
    by_slot: HashMap<usize, usize>,
    by_id: HashMap<String, usize>,
    structure_version: Option<u64>,
}

impl FrozenUnits {
    /// Bring the snapshot up to date with the store.
    pub fn refresh(&mut self, store: &UnitStore, dirty: &BTreeSet<usize>) {
        if self.structure_version != Some(store.structure_version()) {
            self.units = store.snapshot();
            self.by_slot = self
                .units
                .iter()
                .enumerate()
                .map(|(i, u)| (u.slot, i))
                .collect();
            self.by_id = self
                .units
                .iter()
                .enumerate()
                .map(|(i, u)| (u.id.clone(), i))
                .collect();
            self.structure_version = Some(store.structure_version());
            return;
        }
        for &slot in dirty {
            if let (Some(&index), Some(unit)) = (self.by_slot.get(&slot), store.at(slot)) {
                self.units[index] = unit.snapshot();
            }
        }
    }

    /// All frozen units, dead ones included until cleanup removes them.
    #[must_use]
    pub fn units(&self) -> &[UnitSnapshot] {
        &self.units
    }

    /// Position of a unit in [`units`](Self::units).
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Look up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UnitSnapshot> {
        self.index_of(id).map(|i| &self.units[i])
    }

    /// Look up by store slot.
    #[must_use]
    pub fn at_slot(&self, slot: usize) -> Option<&UnitSnapshot> {
        self.by_slot.get(&slot).map(|&i| &self.units[i])
    }

    /// Structure version the snapshot was last rebuilt at.
    #[must_use]
    pub fn structure_version(&self) -> Option<u64> {
        self.structure_version
    }
}

/// Everything a rule may read during one tick, plus queues for what it
/// wants to change.
pub struct TickContext<'a> {
    store: &'a UnitStore,
    frozen: &'a FrozenUnits,
    grid: &'a SpatialGrid,
    environment: &'a Environment,
    projectiles: &'a ProjectilePool,
    particles: &'a ParticlePool,
    rng: &'a mut DeterministicRng,
    config: &'a SimConfig,
    tick: u64,
    commands: Vec<Command>,
    events: Vec<Event>,
}

impl<'a> TickContext<'a> {
    /// Borrow the world for one rule invocation.
    pub fn new(
        world: &'a mut World,
        frozen: &'a FrozenUnits,
        grid: &'a SpatialGrid,
        config: &'a SimConfig,
        tick: u64,
    ) -> Self {
        Self {
            store: &world.store,
            frozen,
            grid,
            environment: &world.environment,
            projectiles: &world.projectiles,
            particles: &world.particles,
            rng: &mut world.rng,
            config,
            tick,
            commands: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Current tick number.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Field width and height.
    #[must_use]
    pub fn field(&self) -> (u32, u32) {
        (self.config.field_width, self.config.field_height)
    }

    /// Kernel configuration.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        self.config
    }

    /// The frozen unit snapshot.
    #[must_use]
    pub fn frozen(&self) -> &'a FrozenUnits {
        self.frozen
    }

    /// Every frozen unit in slot order.
    #[must_use]
    pub fn units(&self) -> &'a [UnitSnapshot] {
        self.frozen.units()
    }

    /// Living units in slot order.
    pub fn alive(&self) -> impl Iterator<Item = &'a UnitSnapshot> + 'a {
        self.frozen.units().iter().filter(|u| u.is_alive())
    }

    /// Look up a unit by id.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&'a UnitSnapshot> {
        self.frozen.get(id)
    }

    /// Living units on `team`.
    pub fn by_team(&self, team: Team) -> impl Iterator<Item = &'a UnitSnapshot> + 'a {
        self.alive().filter(move |u| u.team == team)
    }

    /// Units in `state`.
    pub fn by_state(&self, state: UnitState) -> impl Iterator<Item = &'a UnitSnapshot> + 'a {
        self.frozen.units().iter().filter(move |u| u.state == state)
    }

    /// Living units within `radius` of `center`, in slot order.
    #[must_use]
    pub fn in_radius(&self, center: Vec2Fixed, radius: Fixed) -> Vec<&'a UnitSnapshot> {
        self.grid
            .query_radius(self.store, center, radius)
            .into_iter()
            .filter_map(|slot| self.frozen.at_slot(slot))
            .filter(|u| u.is_alive())
            .collect()
    }

    /// Living units inside the axis-aligned rectangle `[min, max]`.
    #[must_use]
    pub fn in_rect(&self, min: Vec2Fixed, max: Vec2Fixed) -> Vec<&'a UnitSnapshot> {
        self.grid
            .query_rect(self.store, min, max)
            .into_iter()
            .filter_map(|slot| self.frozen.at_slot(slot))
            .filter(|u| u.is_alive())
            .collect()
    }

    /// Nearest living enemy of `unit`, optionally within `range`.
    ///
    /// Ties go to the lower slot.
    #[must_use]
    pub fn nearest_enemy(&self, unit: &UnitSnapshot, range: Option<Fixed>) -> Option<&'a UnitSnapshot> {
        let limit_sq = range.map(|r| r.saturating_mul(r));
        self.alive()
            .filter(|other| unit.team.is_enemy_of(other.team))
            .map(|other| (other.position.distance_squared(unit.position), other))
            .filter(|(d, _)| limit_sq.map_or(true, |l| *d <= l))
            .min_by_key(|(d, other)| (*d, other.slot))
            .map(|(_, other)| other)
    }

    /// Slot pairs closer than `radius`, each pair once with the lower slot first.
    #[must_use]
    pub fn neighbor_pairs(&self, radius: Fixed) -> Vec<(usize, usize)> {
        self.grid.neighbor_pairs(self.store, radius)
    }

    /// The kernel RNG.
    pub fn rng(&mut self) -> &mut DeterministicRng {
        self.rng
    }

    /// Environment grid.
    #[must_use]
    pub fn environment(&self) -> &'a Environment {
        self.environment
    }

    /// Temperature at a position.
    #[must_use]
    pub fn temperature_at(&self, position: Vec2Fixed) -> Fixed {
        self.environment.temperature_at(position)
    }

    /// Humidity at a position.
    #[must_use]
    pub fn humidity_at(&self, position: Vec2Fixed) -> Fixed {
        self.environment.humidity_at(position)
    }

    /// Terrain at a position.
    #[must_use]
    pub fn terrain_at(&self, position: Vec2Fixed) -> Option<TerrainKind> {
        self.environment.terrain_at(position)
    }

    /// Active projectiles as `(slot, position, kind)`.
    pub fn projectiles(&self) -> impl Iterator<Item = (usize, Vec2Fixed, &'a str)> + 'a {
        let pool = self.projectiles;
        pool.active_slots()
            .filter_map(move |slot| Some((slot, pool.position(slot)?, pool.kind(slot)?)))
    }

    /// Active particles as `(position, kind)`.
    pub fn particles(&self) -> impl Iterator<Item = (Vec2Fixed, &'a str)> + 'a {
        self.particles.iter()
    }

    /// Queue a command alongside the rule's return value.
    pub fn queue_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Queue an event.
    pub fn queue_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Consume the context, returning what was queued.
    #[must_use]
    pub fn into_queued(self) -> (Vec<Command>, Vec<Event>) {
        (self.commands, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitSpec;

    fn setup() -> (World, FrozenUnits, SpatialGrid, SimConfig) {
        let config = SimConfig::default();
        let mut world = World::new(&config);
        for (id, x, team) in [("a", 1, Team::Friendly), ("b", 3, Team::Hostile), ("c", 9, Team::Hostile)] {
            world
                .store
                .add(
                    UnitSpec::new("dummy", Vec2Fixed::from_ints(x, 1))
                        .with_id(id)
                        .with_hp(5)
                        .with_team(team),
                )
                .unwrap();
        }
        let dirty = world.store.take_dirty();
        let mut grid = SpatialGrid::new(64, 64, 4, config.capacity);
        grid.sync(&world.store, &dirty);
        let mut frozen = FrozenUnits::default();
        frozen.refresh(&world.store, &dirty);
        (world, frozen, grid, config)
    }

    #[test]
    fn test_queries() {
        let (mut world, frozen, grid, config) = setup();
        let ctx = TickContext::new(&mut world, &frozen, &grid, &config, 0);

        assert_eq!(ctx.units().len(), 3);
        assert_eq!(ctx.by_team(Team::Hostile).count(), 2);
        let near: Vec<&str> = ctx
            .in_radius(Vec2Fixed::from_ints(2, 1), Fixed::from_num(1))
            .iter()
            .map(|u| u.id.as_str())
            .collect();
        assert_eq!(near, vec!["a", "b"]);

        let a = ctx.unit("a").unwrap();
        assert_eq!(ctx.nearest_enemy(a, None).unwrap().id, "b");
        assert!(ctx.nearest_enemy(a, Some(Fixed::from_num(1))).is_none());
    }

    #[test]
    fn test_frozen_view_ignores_later_mutation() {
        let (mut world, mut frozen, _, _) = setup();
        world.store.get_mut("a").unwrap().set_hp(1);
        assert_eq!(frozen.get("a").unwrap().hp, 5);

        let dirty = world.store.take_dirty();
        frozen.refresh(&world.store, &dirty);
        assert_eq!(frozen.get("a").unwrap().hp, 1);
    }

    #[test]
    fn test_structural_change_rebuilds() {
        let (mut world, mut frozen, _, _) = setup();
        let before = frozen.structure_version();
        world.store.remove_by_id("b");
        let dirty = world.store.take_dirty();
        frozen.refresh(&world.store, &dirty);
        assert_ne!(frozen.structure_version(), before);
        assert!(frozen.get("b").is_none());
        assert_eq!(frozen.index_of("c"), Some(1));
    }

    #[test]
    fn test_queued_output() {
        let (mut world, frozen, grid, config) = setup();
        let mut ctx = TickContext::new(&mut world, &frozen, &grid, &config, 4);
        let roll = ctx.rng().next_u32();
        ctx.queue_command(Command::remove("c"));
        let (commands, events) = ctx.into_queued();
        assert_eq!(commands.len(), 1);
        assert!(events.is_empty());
        assert_ne!(world.rng.state(), 12345);
        assert_ne!(roll, 0);
    }
}
