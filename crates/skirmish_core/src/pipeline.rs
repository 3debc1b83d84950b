//! Command and event pipeline.
//!
//! Rules never touch the store directly. They queue [`Command`]s and
//! [`Event`]s, and the pipeline applies them in passes:
//!
//! 1. Commands whose `tick` lies in the future are set aside.
//! 2. Commands with an id already seen this pass are skipped.
//! 3. Individual commands run in emission order.
//! 4. `move` commands for the same unit are folded into one, then applied
//!    in first-emission order. Each field is last-write-wins; absolute
//!    coordinates are applied before deltas.
//! 5. `meta` commands for the same unit are folded the same way: patches
//!    merge key by key and the last `state` wins.
//! 6. Queued events are resolved into commands for the next pass.
//!
//! [`Pipeline::drain`] repeats passes until nothing is left or the
//! iteration cap is reached, in which case the remaining work is dropped
//! with a warning.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::command::{Command, CommandKind, Event, EventKind, EventTarget, Motion};
use crate::config::DEFAULT_MAX_DRAIN_ITERATIONS;
use crate::math::{to_fixed, Fixed, Vec2Fixed};
use crate::pool::UNIT_RADIUS;
use crate::store::UnitStore;
use crate::unit::{status, ColdData, MetaPatch, Team, UnitId, UnitState};
use crate::world::World;

/// Damage that actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageRecord {
    /// Attacker, if known.
    pub source: Option<UnitId>,
    /// Unit hit.
    pub target: UnitId,
    /// Hit points removed after mitigation.
    pub amount: i32,
    /// Damage aspect.
    pub aspect: String,
}

/// What one or more drain passes did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Passes run.
    pub passes: usize,
    /// Commands applied (a coalesced group counts once).
    pub executed: usize,
    /// Commands skipped because their id was already seen in the pass.
    pub duplicates: usize,
    /// Events resolved.
    pub events: usize,
    /// Commands held back for a later tick.
    pub deferred: usize,
    /// Commands and events discarded at the iteration cap.
    pub dropped: usize,
    /// Whether the iteration cap was reached.
    pub cap_hit: bool,
    /// Damage dealt.
    pub damage: Vec<DamageRecord>,
    /// Units added.
    pub spawned: Vec<UnitId>,
    /// Units removed.
    pub removed: Vec<UnitId>,
    /// `(unit, ability)` uses recorded.
    pub abilities_used: Vec<(UnitId, String)>,
}

impl DrainReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: DrainReport) {
        self.passes += other.passes;
        self.executed += other.executed;
        self.duplicates += other.duplicates;
        self.events += other.events;
        self.deferred += other.deferred;
        self.dropped += other.dropped;
        self.cap_hit |= other.cap_hit;
        self.damage.extend(other.damage);
        self.spawned.extend(other.spawned);
        self.removed.extend(other.removed);
        self.abilities_used.extend(other.abilities_used);
    }
}

/// Damage at distance `distance` from the centre of a blast of `radius`.
///
/// Linear falloff, rounded, never below 1 inside the radius and 0 outside.
#[must_use]
pub fn falloff_damage(damage: i32, distance: Fixed, radius: Fixed) -> i32 {
    if damage <= 0 || distance > radius {
        return 0;
    }
    if radius <= Fixed::ZERO {
        return damage;
    }
    let scale = Fixed::from_num(1) - distance / radius;
    let scaled = Fixed::from_num(damage)
        .saturating_mul(scale)
        .saturating_round()
        .saturating_to_num::<i32>();
    scaled.max(1)
}

/// Reduce raw damage by the target's `armor` and `resist_<aspect>` metadata.
fn mitigate(amount: i32, cold: &ColdData, aspect: &str) -> i32 {
    let armor = cold.meta_number("armor").unwrap_or(0.0);
    let resist = cold
        .meta_number(&format!("resist_{aspect}"))
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reduced = to_fixed(f64::from(amount) - armor).max(Fixed::ZERO);
    reduced
        .saturating_mul(Fixed::from_num(1) - to_fixed(resist))
        .saturating_round()
        .saturating_to_num::<i32>()
}

fn untargetable(cold: &ColdData, now: u64) -> bool {
    cold.status_active(status::BURROWED, now)
        || cold.status_active(status::AIRBORNE, now)
        || cold.flag("invulnerable")
}

/// Folded `move` commands for one unit.
#[derive(Debug, Default)]
struct MoveAcc {
    x: Option<Fixed>,
    y: Option<Fixed>,
    dx: Option<Fixed>,
    dy: Option<Fixed>,
}

/// Folded `meta` commands for one unit.
#[derive(Debug, Default)]
struct MetaAcc {
    patch: MetaPatch,
    state: Option<UnitState>,
}

fn fold_entry<'a, T: Default>(
    list: &'a mut Vec<(UnitId, T)>,
    index: &mut HashMap<UnitId, usize>,
    unit: UnitId,
) -> &'a mut T {
    let pos = *index.entry(unit.clone()).or_insert_with(|| {
        list.push((unit, T::default()));
        list.len() - 1
    });
    &mut list[pos].1
}

/// Offsets used to place multiple spawned copies around a point.
const SPAWN_OFFSETS: [(i32, i32); 9] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

/// Queues of pending commands and events.
#[derive(Debug, Clone)]
pub struct Pipeline {
    commands: Vec<Command>,
    events: Vec<Event>,
    deferred: Vec<Command>,
    max_iterations: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DRAIN_ITERATIONS)
    }
}

impl Pipeline {
    /// Create an empty pipeline with the given pass cap.
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            commands: Vec::new(),
            events: Vec::new(),
            deferred: Vec::new(),
            max_iterations: max_iterations.max(1),
        }
    }

    /// Queue a command.
    pub fn enqueue(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Queue several commands, preserving order.
    pub fn enqueue_all(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    /// Queue an event.
    pub fn enqueue_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Commands waiting for the next pass (including delayed ones).
    #[must_use]
    pub fn pending_commands(&self) -> &[Command] {
        &self.commands
    }

    /// Events waiting for the next pass.
    #[must_use]
    pub fn pending_events(&self) -> &[Event] {
        &self.events
    }

    /// Pass cap.
    #[must_use]
    pub const fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn has_work(&self) -> bool {
        !self.commands.is_empty() || !self.events.is_empty()
    }

    /// Drain until idle or until the pass cap is reached.
    ///
    /// Delayed commands are returned to the queue afterwards, so they are
    /// looked at again on the next drain.
    pub fn drain(&mut self, world: &mut World, now: u64) -> DrainReport {
        let mut report = DrainReport::default();
        while self.has_work() {
            if report.passes >= self.max_iterations {
                let dropped = self.commands.len() + self.events.len();
                let kinds: Vec<&str> = self
                    .commands
                    .iter()
                    .map(|c| c.kind.name())
                    .chain(self.events.iter().map(Event::name))
                    .collect();
                tracing::warn!(
                    tick = now,
                    passes = report.passes,
                    dropped,
                    ?kinds,
                    "Drain iteration cap reached, dropping remaining work"
                );
                self.commands.clear();
                self.events.clear();
                report.dropped += dropped;
                report.cap_hit = true;
                break;
            }
            self.drain_once(world, now, &mut report);
        }
        self.commands.append(&mut self.deferred);
        report
    }

    /// Run a single pass. Returns whether more work is queued.
    pub fn drain_once(&mut self, world: &mut World, now: u64, report: &mut DrainReport) -> bool {
        let batch = std::mem::take(&mut self.commands);
        let mut seen: HashSet<String> = HashSet::new();
        let mut individual = Vec::new();
        let mut moves: Vec<(UnitId, MoveAcc)> = Vec::new();
        let mut move_index = HashMap::new();
        let mut metas: Vec<(UnitId, MetaAcc)> = Vec::new();
        let mut meta_index = HashMap::new();

        for command in batch {
            if !command.is_due(now) {
                report.deferred += 1;
                self.deferred.push(command);
                continue;
            }
            if let Some(id) = &command.id {
                if !seen.insert(id.clone()) {
                    tracing::trace!(id = %id, kind = command.kind.name(), "Skipping duplicate command");
                    report.duplicates += 1;
                    continue;
                }
            }
            match command.kind {
                CommandKind::Move { unit, motion } => {
                    let acc = fold_entry(&mut moves, &mut move_index, unit);
                    match motion {
                        Motion::By(delta) => {
                            acc.dx = Some(delta.x);
                            acc.dy = Some(delta.y);
                        }
                        Motion::To(target) => {
                            acc.x = Some(target.x);
                            acc.y = Some(target.y);
                        }
                    }
                }
                CommandKind::Meta { unit, patch, state } => {
                    let acc = fold_entry(&mut metas, &mut meta_index, unit);
                    acc.patch.extend(patch);
                    if state.is_some() {
                        acc.state = state;
                    }
                }
                _ => individual.push(command),
            }
        }

        for command in individual {
            tracing::trace!(kind = command.kind.name(), source = ?command.source, "Executing command");
            execute(command, world, now, report);
            report.executed += 1;
        }

        for (unit, acc) in moves {
            apply_move(world, &unit, &acc);
            report.executed += 1;
        }

        for (unit, acc) in metas {
            if let Some(mut proxy) = world.store.get_mut(&unit) {
                if !acc.patch.is_empty() {
                    proxy.merge_meta(&acc.patch);
                }
                if let Some(state) = acc.state {
                    proxy.set_state(state);
                }
            }
            report.executed += 1;
        }

        let events = std::mem::take(&mut self.events);
        for event in events {
            tracing::trace!(kind = event.name(), source = ?event.source, "Resolving event");
            let produced = resolve_event(&event, &world.store);
            self.commands.extend(produced);
            report.events += 1;
        }

        report.passes += 1;
        self.has_work()
    }
}

fn apply_move(world: &mut World, unit: &str, acc: &MoveAcc) {
    let (width, height) = world.field;
    let Some(mut proxy) = world.store.get_mut(unit) else {
        return;
    };
    let old = proxy.view().position();
    let mut next = old;
    if let Some(x) = acc.x {
        next.x = x;
    }
    if let Some(y) = acc.y {
        next.y = y;
    }
    next.x += acc.dx.unwrap_or(Fixed::ZERO);
    next.y += acc.dy.unwrap_or(Fixed::ZERO);
    let next = next.clamp_to_field(width, height);
    proxy.set_intent(next - old);
    proxy.set_position(next);
}

/// Apply `amount` raw damage to `target`, recording what landed.
fn apply_damage(
    world: &mut World,
    source: Option<UnitId>,
    target: &str,
    amount: i32,
    aspect: &str,
    now: u64,
    report: &mut DrainReport,
) {
    let Some(mut proxy) = world.store.get_mut(target) else {
        return;
    };
    let view = proxy.view();
    if !view.is_alive() || untargetable(view.cold(), now) {
        return;
    }
    let effective = mitigate(amount, view.cold(), aspect);
    let dealt = proxy.apply_damage(effective);
    if dealt > 0 {
        report.damage.push(DamageRecord {
            source,
            target: target.to_string(),
            amount: dealt,
            aspect: aspect.to_string(),
        });
    }
}

#[allow(clippy::too_many_lines)]
fn execute(command: Command, world: &mut World, now: u64, report: &mut DrainReport) {
    let (width, height) = world.field;
    let source = command.source;
    match command.kind {
        CommandKind::Damage {
            target,
            amount,
            aspect,
        } => apply_damage(world, source, &target, amount, &aspect, now, report),
        CommandKind::Heal { target, amount } => {
            if let Some(mut proxy) = world.store.get_mut(&target) {
                if proxy.view().is_alive() {
                    proxy.heal(amount);
                }
            }
        }
        CommandKind::Spawn { unit } => match world.store.add(*unit) {
            Ok(slot) => {
                if let Some(view) = world.store.at(slot) {
                    report.spawned.push(view.id().to_string());
                }
            }
            Err(err) => tracing::debug!(error = %err, "Spawn command rejected"),
        },
        CommandKind::Remove { unit } => {
            if let Some(id) = world.store.remove_by_id(&unit) {
                report.removed.push(id);
            }
        }
        CommandKind::Aoe {
            center,
            radius,
            damage,
            aspect,
            exclude_team,
        } => {
            let hits: Vec<(UnitId, i32)> = world
                .store
                .iter()
                .filter(|u| u.is_alive() && exclude_team != Some(u.team()))
                .filter_map(|u| {
                    let amount = falloff_damage(damage, u.position().distance(center), radius);
                    (amount > 0).then(|| (u.id().to_string(), amount))
                })
                .collect();
            for (target, amount) in hits {
                apply_damage(world, source.clone(), &target, amount, &aspect, now, report);
            }
        }
        CommandKind::Projectile(spawn) => {
            // The pool logs when full.
            let _ = world.projectiles.spawn(*spawn);
        }
        CommandKind::Particles {
            spawn,
            count,
            spread,
        } => {
            let spread = spread.to_num::<f64>();
            for _ in 0..count {
                let jitter = Vec2Fixed::from_f64(
                    world.rng.range(-spread, spread),
                    world.rng.range(-spread, spread),
                );
                let mut particle = spawn.clone();
                particle.velocity = particle.velocity + jitter;
                if world.particles.spawn(particle).is_err() {
                    break;
                }
            }
        }
        CommandKind::Jump { unit, to, duration } => {
            if let Some(mut proxy) = world.store.get_mut(&unit) {
                proxy.set_position(to.clamp_to_field(width, height));
                proxy.set_meta(status::until_key(status::AIRBORNE), json!(now.saturating_add(duration)));
            }
        }
        CommandKind::Toss { unit, to, damage } => {
            let Some(mut proxy) = world.store.get_mut(&unit) else {
                return;
            };
            proxy.set_position(to.clamp_to_field(width, height));
            if damage > 0 {
                apply_damage(world, source, &unit, damage, "impact", now, report);
            }
        }
        CommandKind::Burrow { unit, duration } => {
            if let Some(mut proxy) = world.store.get_mut(&unit) {
                proxy.set_meta(status::until_key(status::BURROWED), json!(now.saturating_add(duration)));
            }
        }
        CommandKind::Charm {
            unit,
            team,
            duration,
        } => charm(world, &unit, team, duration, now),
        CommandKind::Knockback {
            unit,
            origin,
            force,
        } => {
            let Some(mut proxy) = world.store.get_mut(&unit) else {
                return;
            };
            let position = proxy.view().position();
            let direction = (position - origin).normalize();
            if direction == Vec2Fixed::ZERO {
                return;
            }
            let mass = proxy.view().mass().max(Fixed::from_num(0.1));
            let next = (position + direction.scale(force / mass)).clamp_to_field(width, height);
            proxy.set_position(next);
        }
        CommandKind::Terrain {
            center,
            radius,
            terrain,
            duration,
        } => world
            .environment
            .paint_terrain(center, radius, terrain, duration, now),
        CommandKind::Weather {
            weather,
            intensity,
            duration,
        } => world.environment.set_weather(weather, intensity, duration, now),
        CommandKind::AbilityUsed { unit, ability } => {
            if let Some(mut proxy) = world.store.get_mut(&unit) {
                proxy.mark_ability_used(&ability, now);
                report.abilities_used.push((unit, ability));
            }
        }
        CommandKind::Move { unit, motion } => {
            let mut acc = MoveAcc::default();
            match motion {
                Motion::By(delta) => (acc.dx, acc.dy) = (Some(delta.x), Some(delta.y)),
                Motion::To(target) => (acc.x, acc.y) = (Some(target.x), Some(target.y)),
            }
            apply_move(world, &unit, &acc);
        }
        CommandKind::Meta { unit, patch, state } => {
            if let Some(mut proxy) = world.store.get_mut(&unit) {
                proxy.merge_meta(&patch);
                if let Some(state) = state {
                    proxy.set_state(state);
                }
            }
        }
    }
}

fn charm(world: &mut World, unit: &str, team: Team, duration: Option<u64>, now: u64) {
    let Some(mut proxy) = world.store.get_mut(unit) else {
        return;
    };
    let until_key = status::until_key(status::CHARMED);
    match duration {
        Some(duration) => {
            if !proxy.view().meta().contains_key("charmed_from") {
                let original = proxy.view().team();
                proxy.set_meta("charmed_from", json!(original.as_str()));
            }
            proxy.set_meta(status::CHARMED, json!(true));
            proxy.set_meta(until_key, json!(now.saturating_add(duration)));
        }
        None => {
            proxy.remove_meta("charmed_from");
            proxy.remove_meta(status::CHARMED);
            proxy.remove_meta(&until_key);
        }
    }
    proxy.set_team(team);
}

/// Alive units within `radius` of `center`, in slot order, with distances.
fn units_within(store: &UnitStore, center: Vec2Fixed, radius: Fixed) -> Vec<(UnitId, Team, Fixed)> {
    store
        .iter()
        .filter(|u| u.is_alive())
        .filter_map(|u| {
            let distance = u.position().distance(center);
            (distance <= radius).then(|| (u.id().to_string(), u.team(), distance))
        })
        .collect()
}

/// The unit a point-targeted event lands on: nearest within one body radius.
fn unit_at(store: &UnitStore, point: Vec2Fixed) -> Option<UnitId> {
    units_within(store, point, UNIT_RADIUS)
        .into_iter()
        .min_by_key(|(_, _, distance)| *distance)
        .map(|(id, _, _)| id)
}

fn hostile(source_team: Option<Team>, team: Team) -> bool {
    source_team.map_or(true, |t| t.is_enemy_of(team))
}

/// Turn an event into commands for the next pass.
///
/// Events aimed at a unit that no longer exists produce nothing.
fn resolve_event(event: &Event, store: &UnitStore) -> Vec<Command> {
    let center = match &event.target {
        EventTarget::Unit(id) => match store.get(id) {
            Some(unit) => unit.position(),
            None => return Vec::new(),
        },
        EventTarget::Point(point) => *point,
    };
    let source = event.source.clone();
    let source_team = source.as_deref().and_then(|id| store.get(id)).map(|u| u.team());
    let is_source = |id: &str| source.as_deref() == Some(id);
    let single_target = || match &event.target {
        EventTarget::Unit(id) => Some(id.clone()),
        EventTarget::Point(point) => unit_at(store, *point),
    };

    let mut out = Vec::new();
    let mut hit: Vec<UnitId> = Vec::new();
    match &event.kind {
        EventKind::Aoe {
            radius,
            damage,
            aspect,
        } => {
            for (id, team, distance) in units_within(store, center, *radius) {
                if is_source(&id) || !hostile(source_team, team) {
                    continue;
                }
                let amount = falloff_damage(*damage, distance, *radius);
                let mut command = Command::damage(id.clone(), amount, aspect.clone());
                command.source = source.clone();
                out.push(command);
                hit.push(id);
            }
        }
        EventKind::Damage { amount, aspect } => {
            if let Some(id) = single_target() {
                let mut command = Command::damage(id.clone(), *amount, aspect.clone());
                command.source = source.clone();
                out.push(command);
                hit.push(id);
            }
        }
        EventKind::Heal { amount, radius } => {
            if *radius <= Fixed::ZERO {
                if let Some(id) = single_target() {
                    out.push(Command::heal(id.clone(), *amount));
                    hit.push(id);
                }
            } else {
                for (id, team, _) in units_within(store, center, *radius) {
                    let friendly = is_source(&id) || source_team.map_or(true, |t| t.is_ally_of(team));
                    if friendly {
                        out.push(Command::heal(id.clone(), *amount));
                        hit.push(id);
                    }
                }
            }
        }
        EventKind::Knockback { force, radius } => {
            for (id, team, _) in units_within(store, center, *radius) {
                if is_source(&id) || !hostile(source_team, team) {
                    continue;
                }
                out.push(Command::knockback(id.clone(), center, *force));
                hit.push(id);
            }
        }
        EventKind::Spawn { unit, count } => {
            let free = store.capacity().saturating_sub(store.len());
            for i in 0..(*count as usize).min(free) {
                let mut spec = (**unit).clone();
                let (ox, oy) = SPAWN_OFFSETS[i % SPAWN_OFFSETS.len()];
                spec.position = center + Vec2Fixed::from_ints(ox, oy);
                if *count > 1 {
                    spec.id = None;
                }
                if spec.team == Team::Neutral {
                    if let Some(team) = source_team {
                        spec.team = team;
                    }
                }
                out.push(Command::spawn(spec));
            }
        }
        EventKind::Terrain {
            terrain,
            radius,
            duration,
        } => {
            out.push(
                CommandKind::Terrain {
                    center,
                    radius: *radius,
                    terrain: *terrain,
                    duration: *duration,
                }
                .into(),
            );
        }
        EventKind::Status { radius, allies } => {
            for (id, team, _) in units_within(store, center, *radius) {
                let matches = if *allies {
                    is_source(&id) || source_team.map_or(true, |t| t.is_ally_of(team))
                } else {
                    !is_source(&id) && hostile(source_team, team)
                };
                if matches {
                    hit.push(id);
                }
            }
        }
    }

    if !event.meta.is_empty() {
        let patch: MetaPatch = event
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        for id in hit {
            out.push(Command::meta(id, patch.clone()));
        }
    }

    for command in &mut out {
        if command.source.is_none() {
            command.source.clone_from(&source);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::UnitSpec;

    fn world() -> World {
        World::new(&SimConfig::default())
    }

    fn add(world: &mut World, id: &str, x: i32, y: i32, team: Team) {
        world
            .store
            .add(
                UnitSpec::new("dummy", Vec2Fixed::from_ints(x, y))
                    .with_id(id)
                    .with_hp(20)
                    .with_team(team),
            )
            .unwrap();
    }

    fn hp(world: &World, id: &str) -> i32 {
        world.store.get(id).unwrap().hp()
    }

    #[test]
    fn test_falloff_damage() {
        let r = Fixed::from_num(3);
        assert_eq!(falloff_damage(10, Fixed::ZERO, r), 10);
        assert_eq!(falloff_damage(10, Fixed::from_num(2), r), 3);
        assert_eq!(falloff_damage(10, Fixed::from_num(5), r), 0);
        assert_eq!(falloff_damage(10, r, r), 1);
    }

    #[test]
    fn test_aoe_event_falloff_and_range() {
        let mut world = world();
        add(&mut world, "caster", 0, 0, Team::Friendly);
        add(&mut world, "a", 10, 10, Team::Hostile);
        add(&mut world, "b", 12, 10, Team::Hostile);
        add(&mut world, "c", 15, 10, Team::Hostile);

        let mut pipeline = Pipeline::default();
        pipeline.enqueue_event(
            Event::new(
                EventKind::Aoe {
                    radius: Fixed::from_num(3),
                    damage: 10,
                    aspect: "fire".into(),
                },
                EventTarget::Point(Vec2Fixed::from_ints(10, 10)),
            )
            .from_unit("caster"),
        );
        let report = pipeline.drain(&mut world, 0);

        assert_eq!(hp(&world, "a"), 10);
        assert_eq!(hp(&world, "b"), 17);
        assert_eq!(hp(&world, "c"), 20);
        assert_eq!(hp(&world, "caster"), 20);
        assert_eq!(report.passes, 2);
        assert_eq!(report.damage.len(), 2);
        assert!(report.damage.iter().all(|d| d.source.as_deref() == Some("caster")));
    }

    #[test]
    fn test_duplicate_ids_skipped() {
        let mut world = world();
        add(&mut world, "orc", 1, 1, Team::Hostile);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::damage("orc", 3, "physical").with_id("hit"));
        pipeline.enqueue(Command::damage("orc", 3, "physical").with_id("hit"));
        pipeline.enqueue(Command::damage("orc", 1, "physical"));
        let report = pipeline.drain(&mut world, 0);

        assert_eq!(hp(&world, "orc"), 16);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_moves_coalesce_last_write_wins() {
        let mut world = world();
        add(&mut world, "u", 5, 5, Team::Friendly);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::move_by("u", Vec2Fixed::from_ints(1, 0)));
        pipeline.enqueue(Command::move_by("u", Vec2Fixed::from_ints(0, 2)));
        pipeline.enqueue(Command::move_to("u", Vec2Fixed::from_ints(20, 20)));
        let report = pipeline.drain(&mut world, 0);

        assert_eq!(
            world.store.get("u").unwrap().position(),
            Vec2Fixed::from_ints(20, 22)
        );
        assert_eq!(report.executed, 1);
    }

    #[test]
    fn test_meta_patches_merge() {
        let mut world = world();
        add(&mut world, "u", 5, 5, Team::Friendly);
        let mut first = MetaPatch::new();
        first.insert("a".into(), Some(json!(1)));
        first.insert("b".into(), Some(json!(1)));
        let mut second = MetaPatch::new();
        second.insert("b".into(), Some(json!(2)));

        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::meta("u", first));
        pipeline.enqueue(Command::set_state("u", UnitState::Attack));
        pipeline.enqueue(Command::meta("u", second));
        pipeline.drain(&mut world, 0);

        let unit = world.store.get("u").unwrap();
        assert_eq!(unit.meta()["a"], json!(1));
        assert_eq!(unit.meta()["b"], json!(2));
        assert_eq!(unit.state(), UnitState::Attack);
    }

    #[test]
    fn test_delayed_command_waits() {
        let mut world = world();
        add(&mut world, "u", 5, 5, Team::Friendly);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::damage("u", 5, "physical").at_tick(2));

        let report = pipeline.drain(&mut world, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(hp(&world, "u"), 20);
        assert_eq!(pipeline.pending_commands().len(), 1);

        pipeline.drain(&mut world, 2);
        assert_eq!(hp(&world, "u"), 15);
        assert!(pipeline.pending_commands().is_empty());
    }

    #[test]
    fn test_iteration_cap_drops_work() {
        let mut world = world();
        add(&mut world, "u", 5, 5, Team::Friendly);
        let mut pipeline = Pipeline::new(2);
        for _ in 0..3 {
            pipeline.enqueue_event(Event::new(
                EventKind::Damage {
                    amount: 1,
                    aspect: "physical".into(),
                },
                EventTarget::Unit("u".into()),
            ));
        }
        let report = pipeline.drain(&mut world, 0);
        assert!(!report.cap_hit);
        assert_eq!(hp(&world, "u"), 17);

        let mut pipeline = Pipeline::new(1);
        pipeline.enqueue_event(Event::new(
            EventKind::Damage {
                amount: 1,
                aspect: "physical".into(),
            },
            EventTarget::Unit("u".into()),
        ));
        let report = pipeline.drain(&mut world, 0);
        assert!(report.cap_hit);
        assert_eq!(report.dropped, 1);
        assert_eq!(hp(&world, "u"), 17);
        assert!(pipeline.pending_commands().is_empty());
    }

    #[test]
    fn test_missing_targets_ignored() {
        let mut world = world();
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::damage("ghost", 5, "physical"));
        pipeline.enqueue(Command::move_by("ghost", Vec2Fixed::from_ints(1, 1)));
        pipeline.enqueue_event(Event::new(
            EventKind::Knockback {
                force: Fixed::from_num(1),
                radius: Fixed::from_num(2),
            },
            EventTarget::Unit("ghost".into()),
        ));
        let report = pipeline.drain(&mut world, 0);
        assert!(report.damage.is_empty());
        assert!(!report.cap_hit);
    }

    #[test]
    fn test_armor_and_resistance() {
        let mut world = world();
        world
            .store
            .add(
                UnitSpec::new("golem", Vec2Fixed::from_ints(1, 1))
                    .with_id("g")
                    .with_hp(50)
                    .with_meta("armor", json!(2))
                    .with_meta("resist_fire", json!(0.5)),
            )
            .unwrap();
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::damage("g", 10, "fire"));
        pipeline.enqueue(Command::damage("g", 10, "physical"));
        pipeline.drain(&mut world, 0);
        assert_eq!(hp(&world, "g"), 50 - 4 - 8);
    }

    #[test]
    fn test_burrowed_units_take_no_damage() {
        let mut world = world();
        add(&mut world, "mole", 3, 3, Team::Hostile);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(CommandKind::Burrow { unit: "mole".into(), duration: 5 }.into());
        pipeline.drain(&mut world, 0);

        pipeline.enqueue(Command::damage("mole", 5, "physical"));
        pipeline.drain(&mut world, 1);
        assert_eq!(hp(&world, "mole"), 20);

        pipeline.enqueue(Command::damage("mole", 5, "physical"));
        pipeline.drain(&mut world, 5);
        assert_eq!(hp(&world, "mole"), 15);
    }

    #[test]
    fn test_knockback_scales_with_mass() {
        let mut world = world();
        add(&mut world, "light", 10, 10, Team::Hostile);
        world
            .store
            .add(
                UnitSpec::new("ogre", Vec2Fixed::from_ints(10, 20))
                    .with_id("heavy")
                    .with_mass(Fixed::from_num(4)),
            )
            .unwrap();
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::knockback("light", Vec2Fixed::from_ints(8, 10), Fixed::from_num(4)));
        pipeline.enqueue(Command::knockback("heavy", Vec2Fixed::from_ints(8, 20), Fixed::from_num(4)));
        pipeline.drain(&mut world, 0);

        assert_eq!(world.store.get("light").unwrap().position(), Vec2Fixed::from_ints(14, 10));
        assert_eq!(world.store.get("heavy").unwrap().position(), Vec2Fixed::from_ints(11, 20));
    }

    #[test]
    fn test_charm_and_restore() {
        let mut world = world();
        add(&mut world, "orc", 3, 3, Team::Hostile);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(
            CommandKind::Charm {
                unit: "orc".into(),
                team: Team::Friendly,
                duration: Some(10),
            }
            .into(),
        );
        pipeline.drain(&mut world, 0);
        let orc = world.store.get("orc").unwrap();
        assert_eq!(orc.team(), Team::Friendly);
        assert_eq!(orc.meta()["charmed_from"], json!("hostile"));
        assert!(orc.cold().status_active(status::CHARMED, 5));

        pipeline.enqueue(
            CommandKind::Charm {
                unit: "orc".into(),
                team: Team::Hostile,
                duration: None,
            }
            .into(),
        );
        pipeline.drain(&mut world, 10);
        let orc = world.store.get("orc").unwrap();
        assert_eq!(orc.team(), Team::Hostile);
        assert!(!orc.meta().contains_key("charmed_from"));
    }

    #[test]
    fn test_spawn_event_places_copies() {
        let mut world = world();
        add(&mut world, "necro", 10, 10, Team::Hostile);
        let mut pipeline = Pipeline::default();
        pipeline.enqueue_event(
            Event::new(
                EventKind::Spawn {
                    unit: Box::new(UnitSpec::new("skeleton", Vec2Fixed::ZERO).with_id("s")),
                    count: 3,
                },
                EventTarget::Unit("necro".into()),
            )
            .from_unit("necro"),
        );
        let report = pipeline.drain(&mut world, 0);
        assert_eq!(report.spawned.len(), 3);
        assert_eq!(world.store.len(), 4);
        for id in &report.spawned {
            assert_eq!(world.store.get(id).unwrap().team(), Team::Hostile);
        }
    }

    #[test]
    fn test_spawn_event_count_is_bounded_by_free_slots() {
        let config = SimConfig {
            capacity: 8,
            ..SimConfig::default()
        };
        let mut world = World::new(&config);
        add(&mut world, "necro", 10, 10, Team::Hostile);
        add(&mut world, "orc", 12, 10, Team::Hostile);
        let event = Event::new(
            EventKind::Spawn {
                unit: Box::new(UnitSpec::new("skeleton", Vec2Fixed::ZERO)),
                count: u32::MAX,
            },
            EventTarget::Unit("necro".into()),
        )
        .from_unit("necro");
        assert_eq!(resolve_event(&event, &world.store).len(), 6);

        let mut pipeline = Pipeline::default();
        pipeline.enqueue_event(event);
        let report = pipeline.drain(&mut world, 0);
        assert_eq!(report.spawned.len(), 6);
        assert_eq!(world.store.len(), 8);
    }

    #[test]
    fn test_huge_armor_values_do_not_overflow() {
        let mut world = world();
        add(&mut world, "golem", 5, 5, Team::Hostile);
        world.store.get_mut("golem").unwrap().set_meta("armor", json!(-1e12));
        let mut pipeline = Pipeline::default();
        pipeline.enqueue(Command::damage("golem", i32::MAX, "physical"));
        pipeline.drain(&mut world, 0);
        assert!(hp(&world, "golem") <= 0);
    }

    #[test]
    fn test_status_event_applies_meta_to_allies() {
        let mut world = world();
        add(&mut world, "priest", 5, 5, Team::Friendly);
        add(&mut world, "knight", 6, 5, Team::Friendly);
        add(&mut world, "orc", 5, 6, Team::Hostile);
        let mut meta = crate::unit::Meta::new();
        meta.insert("blessed".into(), json!(true));

        let mut pipeline = Pipeline::default();
        pipeline.enqueue_event(
            Event::new(
                EventKind::Status {
                    radius: Fixed::from_num(3),
                    allies: true,
                },
                EventTarget::Unit("priest".into()),
            )
            .from_unit("priest")
            .with_meta(meta),
        );
        pipeline.drain(&mut world, 0);

        assert!(world.store.get("priest").unwrap().cold().flag("blessed"));
        assert!(world.store.get("knight").unwrap().cold().flag("blessed"));
        assert!(!world.store.get("orc").unwrap().cold().flag("blessed"));
    }
}
