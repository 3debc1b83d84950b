//! The abilities rule: readiness, triggers, targets and effect interpretation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use serde_json::{json, Value as Json};

use super::definition::{AbilityDef, Effect, ProjectileEffect, StatusPatch, TargetSpec};
use super::library::AbilityLibrary;
use super::params::Param;
use crate::command::{Command, CommandKind, Event, EventKind, EventTarget};
use crate::context::TickContext;
use crate::dsl::{CompiledExpr, ExpressionCache, Scope, UnitScope, UnitScopeParams, Value};
use crate::error::Result;
use crate::math::{to_amount, to_fixed, Fixed, Vec2Fixed};
use crate::pool::{ParticleSpawn, ProjectileSpawn};
use crate::rules::Rule;
use crate::unit::{status, ColdData, Meta, MetaPatch, UnitSnapshot};

/// Statuses removed by `cleanse`.
const HARMFUL: [&str; 6] = [
    status::STUNNED,
    status::ROOTED,
    status::BURNING,
    status::POISONED,
    status::SLOWED,
    status::CALM,
];

/// Whether `def` may fire for a unit with `cold` data at `now`.
///
/// Ready once `cooldown` ticks have passed since the last use and the
/// use count is below `max_uses`.
#[must_use]
pub fn is_ready(def: &AbilityDef, cold: &ColdData, now: u64) -> bool {
    let cooled = cold
        .last_used
        .get(&def.name)
        .map_or(true, |&last| now.saturating_sub(last) >= def.cooldown);
    let uses = cold.uses.get(&def.name).copied().unwrap_or(0);
    cooled && def.max_uses.map_or(true, |max| uses < max)
}

/// Target selector after compilation.
#[derive(Debug, Clone)]
enum Selector {
    Caster,
    Target,
    CasterPosition,
    Point(Vec2Fixed),
    Expr(Rc<CompiledExpr>),
    /// The expression did not parse; the ability never fires.
    Broken,
}

#[derive(Debug, Clone)]
struct CompiledAbility {
    trigger: Option<Rc<CompiledExpr>>,
    trigger_broken: bool,
    selector: Selector,
}

/// A resolved target.
#[derive(Debug, Clone, Copy)]
enum Aim<'s> {
    Unit(usize, &'s UnitSnapshot),
    Point(Vec2Fixed),
}

impl Aim<'_> {
    fn position(&self) -> Vec2Fixed {
        match self {
            Aim::Unit(_, unit) => unit.position,
            Aim::Point(point) => *point,
        }
    }

    fn event_target(&self) -> EventTarget {
        match self {
            Aim::Unit(_, unit) => EventTarget::Unit(unit.id.clone()),
            Aim::Point(point) => EventTarget::Point(*point),
        }
    }

    fn value(&self) -> Value {
        match self {
            Aim::Unit(index, _) => Value::Unit(*index),
            Aim::Point(point) => {
                let (x, y) = point.to_f64();
                Value::point(x, y)
            }
        }
    }

    fn unit(&self) -> Option<&UnitSnapshot> {
        match self {
            Aim::Unit(_, unit) => Some(unit),
            Aim::Point(_) => None,
        }
    }
}

/// Facts about the cast that every effect needs.
struct Cast<'s> {
    caster: &'s UnitSnapshot,
    units: &'s [UnitSnapshot],
    now: u64,
}

/// Commands and events produced by one unit's abilities.
#[derive(Default)]
struct Emitted {
    commands: Vec<Command>,
    events: Vec<Event>,
}

/// Runs every unit's abilities each tick.
///
/// Compiled selectors and triggers are cached per ability name and
/// dropped whenever units are added or removed; expression compilation
/// itself is memoized for the lifetime of the rule.
#[derive(Debug)]
pub struct Abilities {
    library: Rc<AbilityLibrary>,
    cache: ExpressionCache,
    compiled: HashMap<String, CompiledAbility>,
    compiled_version: Option<u64>,
    warned: HashSet<String>,
}

impl Abilities {
    /// Rule over a shared library.
    #[must_use]
    pub fn new(library: Rc<AbilityLibrary>) -> Self {
        Self {
            library,
            cache: ExpressionCache::new(),
            compiled: HashMap::new(),
            compiled_version: None,
            warned: HashSet::new(),
        }
    }

    /// The library in use.
    #[must_use]
    pub fn library(&self) -> &AbilityLibrary {
        &self.library
    }

    /// Expression cache statistics `(hits, misses)`.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    fn compiled(&mut self, def: &AbilityDef) -> CompiledAbility {
        if let Some(compiled) = self.compiled.get(&def.name) {
            return compiled.clone();
        }
        let (trigger, trigger_broken) = match &def.trigger {
            None => (None, false),
            Some(source) => match self.cache.compile(source) {
                Ok(expr) => (Some(expr), false),
                Err(_) => (None, true),
            },
        };
        let selector = match &def.target {
            None => Selector::Target,
            Some(TargetSpec::Point { x, y }) => Selector::Point(Vec2Fixed::from_f64(*x, *y)),
            Some(TargetSpec::Text(text)) => match text.as_str() {
                "self" => Selector::Caster,
                "target" => Selector::Target,
                "self.pos" => Selector::CasterPosition,
                source => self
                    .cache
                    .compile(source)
                    .map_or(Selector::Broken, Selector::Expr),
            },
        };
        let compiled = CompiledAbility {
            trigger,
            trigger_broken,
            selector,
        };
        self.compiled.insert(def.name.clone(), compiled.clone());
        compiled
    }
}

/// The unit's current target: its `target` metadata if that unit is
/// alive, otherwise the closest enemy.
fn default_target(ctx: &TickContext<'_>, unit: &UnitSnapshot) -> Option<usize> {
    let frozen = ctx.frozen();
    unit.cold
        .meta
        .get("target")
        .and_then(Json::as_str)
        .and_then(|id| frozen.index_of(id))
        .filter(|&i| frozen.units()[i].is_alive())
        .or_else(|| {
            ctx.nearest_enemy(unit, None)
                .and_then(|enemy| frozen.index_of(&enemy.id))
        })
}

fn aim_from_value<'s>(value: &Value, units: &'s [UnitSnapshot], out: &mut Vec<Aim<'s>>) {
    match value {
        Value::Unit(index) => {
            if let Some(unit) = units.get(*index) {
                out.push(Aim::Unit(*index, unit));
            }
        }
        Value::Object(map) => {
            if let (Some(x), Some(y)) = (
                map.get("x").and_then(Value::as_number),
                map.get("y").and_then(Value::as_number),
            ) {
                out.push(Aim::Point(Vec2Fixed::from_f64(x, y)));
            }
        }
        Value::Array(items) => {
            for item in items.iter() {
                aim_from_value(item, units, out);
            }
        }
        _ => {}
    }
}

fn meta_patch(
    meta: &BTreeMap<String, Param>,
    duration: Option<&Param>,
    cast: &Cast<'_>,
    scope: &dyn Scope,
    cache: &mut ExpressionCache,
) -> Result<Meta> {
    let until = match duration {
        Some(d) => Some(cast.now.saturating_add(d.ticks(cache, scope)?)),
        None => None,
    };
    let mut out = Meta::new();
    for (key, param) in meta {
        let value = param.resolve(cache, scope)?.to_json().unwrap_or(Json::Null);
        out.insert(key.clone(), value);
        if let Some(until) = until {
            out.insert(status::until_key(key), json!(until));
        }
    }
    Ok(out)
}

fn timed(name: &str, until: u64) -> Meta {
    let mut meta = Meta::new();
    meta.insert(status::until_key(name), json!(until));
    meta
}

fn to_patch(meta: Meta) -> MetaPatch {
    meta.into_iter().map(|(k, v)| (k, Some(v))).collect()
}

fn damage_command(target: &UnitSnapshot, amount: f64, aspect: &str, cast: &Cast<'_>) -> Command {
    Command::damage(target.id.clone(), to_amount(amount), aspect)
        .from_unit(cast.caster.id.clone())
}

/// Unit vector from the caster toward `to`, in `f64`.
fn heading(from: Vec2Fixed, to: Vec2Fixed) -> Option<(f64, f64)> {
    let (fx, fy) = from.to_f64();
    let (tx, ty) = to.to_f64();
    let (dx, dy) = (tx - fx, ty - fy);
    let len = dx.hypot(dy);
    (len > 0.0).then(|| (dx / len, dy / len))
}

fn enemies_of<'s>(cast: &Cast<'s>) -> impl Iterator<Item = &'s UnitSnapshot> + 's {
    let caster = cast.caster;
    cast.units
        .iter()
        .filter(move |u| u.is_alive() && caster.team.is_enemy_of(u.team))
}

fn launch(
    shot: &ProjectileEffect,
    angles: &[f64],
    cast: &Cast<'_>,
    scope: &dyn Scope,
    cache: &mut ExpressionCache,
    out: &mut Emitted,
) -> Result<()> {
    let damage = shot.damage.number(cache, scope)?;
    let speed = shot.speed.number(cache, scope)?;
    let radius = match &shot.radius {
        Some(r) => to_fixed(r.number(cache, scope)?),
        None => Fixed::from_num(0.25),
    };
    let explode_radius = match &shot.explode_radius {
        Some(r) => to_fixed(r.number(cache, scope)?),
        None => Fixed::ZERO,
    };
    for angle in angles {
        let velocity = Vec2Fixed::from_f64(angle.cos() * speed, angle.sin() * speed);
        out.commands.push(
            Command::projectile(ProjectileSpawn {
                position: cast.caster.position,
                velocity,
                radius,
                lifetime: shot.lifetime,
                kind: shot.kind.clone(),
                source: Some(cast.caster.id.clone()),
                team: cast.caster.team,
                damage: to_amount(damage),
                aspect: shot.aspect.clone(),
                explode_radius,
            })
            .from_unit(cast.caster.id.clone()),
        );
    }
    Ok(())
}

/// Interpret one effect against one target.
#[allow(clippy::too_many_lines)]
fn apply_effect(
    effect: &Effect,
    aim: Aim<'_>,
    cast: &Cast<'_>,
    scope: &dyn Scope,
    cache: &mut ExpressionCache,
    out: &mut Emitted,
) -> Result<()> {
    let caster = cast.caster;
    let now = cast.now;
    let source = caster.id.clone();
    let event = |kind: EventKind| Event::new(kind, aim.event_target()).from_unit(source.clone());

    match effect {
        Effect::Damage { amount, aspect } => {
            let amount = amount.number(cache, scope)?;
            match aim.unit() {
                Some(unit) => out.commands.push(damage_command(unit, amount, aspect, cast)),
                None => out.events.push(event(EventKind::Damage {
                    amount: to_amount(amount),
                    aspect: aspect.clone(),
                })),
            }
        }
        Effect::Heal { amount, radius } => {
            let amount = to_amount(amount.number(cache, scope)?);
            let radius = match radius {
                Some(r) => to_fixed(r.number(cache, scope)?),
                None => Fixed::ZERO,
            };
            match aim.unit() {
                Some(unit) if radius == Fixed::ZERO => {
                    out.commands.push(Command::heal(unit.id.clone(), amount).from_unit(source.clone()));
                }
                _ => out.events.push(event(EventKind::Heal { amount, radius })),
            }
        }
        Effect::Aoe {
            radius,
            damage,
            aspect,
            meta,
        } => {
            let radius = to_fixed(radius.number(cache, scope)?);
            let damage = to_amount(damage.number(cache, scope)?);
            let meta = meta_patch(meta, None, cast, scope, cache)?;
            out.events.push(
                event(EventKind::Aoe {
                    radius,
                    damage,
                    aspect: aspect.clone(),
                })
                .with_meta(meta),
            );
        }
        Effect::Projectile(shot) => {
            if let Some((dx, dy)) = heading(caster.position, aim.position()) {
                launch(shot, &[dy.atan2(dx)], cast, scope, cache, out)?;
            }
        }
        Effect::MultiProjectile(shot) => {
            if let Some((dx, dy)) = heading(caster.position, aim.position()) {
                let count = match &shot.count {
                    Some(c) => c.ticks(cache, scope)?,
                    None => 3,
                };
                let spread = match &shot.spread {
                    Some(s) => s.number(cache, scope)?,
                    None => 30.0,
                }
                .to_radians();
                let base = dy.atan2(dx);
                #[allow(clippy::cast_precision_loss)]
                let angles: Vec<f64> = (0..count)
                    .map(|i| {
                        if count <= 1 {
                            base
                        } else {
                            base + spread * (i as f64 / (count - 1) as f64 - 0.5)
                        }
                    })
                    .collect();
                launch(shot, &angles, cast, scope, cache, out)?;
            }
        }
        Effect::Cone {
            range,
            angle,
            damage,
            aspect,
        } => {
            let Some(dir) = heading(caster.position, aim.position()) else {
                return Ok(());
            };
            let range = to_fixed(range.number(cache, scope)?);
            let half = (angle.number(cache, scope)? / 2.0).to_radians().cos();
            let amount = damage.number(cache, scope)?;
            for unit in enemies_of(cast) {
                if unit.position.distance(caster.position) > range {
                    continue;
                }
                let Some((ux, uy)) = heading(caster.position, unit.position) else {
                    continue;
                };
                if ux * dir.0 + uy * dir.1 >= half {
                    out.commands.push(damage_command(unit, amount, aspect, cast));
                }
            }
        }
        Effect::Line {
            length,
            width,
            damage,
            aspect,
        } => {
            let Some((dx, dy)) = heading(caster.position, aim.position()) else {
                return Ok(());
            };
            let length = length.number(cache, scope)?;
            let half_width = width.number(cache, scope)? / 2.0;
            let amount = damage.number(cache, scope)?;
            let (cx, cy) = caster.position.to_f64();
            for unit in enemies_of(cast) {
                let (ux, uy) = unit.position.to_f64();
                let (rx, ry) = (ux - cx, uy - cy);
                let along = rx * dx + ry * dy;
                let across = (rx * dy - ry * dx).abs();
                if (0.0..=length).contains(&along) && across <= half_width {
                    out.commands.push(damage_command(unit, amount, aspect, cast));
                }
            }
        }
        Effect::Buff(StatusPatch { meta, duration }) | Effect::Debuff(StatusPatch { meta, duration }) => {
            if let Some(unit) = aim.unit() {
                let meta = meta_patch(meta, duration.as_ref(), cast, scope, cache)?;
                out.commands.push(Command::meta(unit.id.clone(), to_patch(meta)).from_unit(source.clone()));
            }
        }
        Effect::AreaBuff {
            radius,
            meta,
            duration,
            allies,
        } => {
            let radius = to_fixed(radius.number(cache, scope)?);
            let meta = meta_patch(meta, duration.as_ref(), cast, scope, cache)?;
            out.events.push(
                event(EventKind::Status {
                    radius,
                    allies: *allies,
                })
                .with_meta(meta),
            );
        }
        Effect::Summon { unit, count } => {
            #[allow(clippy::cast_possible_truncation)]
            let count = count.ticks(cache, scope)?.min(u64::from(u32::MAX)) as u32;
            out.events.push(event(EventKind::Spawn {
                unit: Box::new(unit.to_spec(aim.position(), caster.team)),
                count,
            }));
        }
        Effect::Deploy { unit } => {
            out.commands.push(Command::spawn(unit.to_spec(aim.position(), caster.team)).from_unit(source.clone()));
        }
        Effect::Grapple { duration } => {
            let Some(unit) = aim.unit() else {
                return Ok(());
            };
            let pull = (unit.position - caster.position).normalize();
            out.commands.push(Command::move_to(unit.id.clone(), caster.position + pull).from_unit(source.clone()));
            if let Some(duration) = duration {
                let until = now.saturating_add(duration.ticks(cache, scope)?);
                out.commands.push(Command::meta(unit.id.clone(), to_patch(timed(status::ROOTED, until))));
            }
        }
        Effect::Pin { duration } => {
            if let Some(unit) = aim.unit() {
                let until = now.saturating_add(duration.ticks(cache, scope)?);
                out.commands.push(Command::meta(unit.id.clone(), to_patch(timed(status::ROOTED, until))));
            }
        }
        Effect::Terrain {
            terrain,
            radius,
            duration,
        } => {
            let radius = to_fixed(radius.number(cache, scope)?);
            let duration = duration.ticks(cache, scope)?;
            out.events.push(event(EventKind::Terrain {
                terrain: *terrain,
                radius,
                duration,
            }));
        }
        Effect::Particles {
            kind,
            count,
            spread,
            lifetime,
        } => {
            #[allow(clippy::cast_possible_truncation)]
            let count = count.ticks(cache, scope)?.min(1024) as u32;
            let spread = match spread {
                Some(s) => to_fixed(s.number(cache, scope)?),
                None => Fixed::from_num(0.2),
            };
            out.commands.push(
                CommandKind::Particles {
                    spawn: ParticleSpawn {
                        position: aim.position(),
                        velocity: Vec2Fixed::ZERO,
                        radius: Fixed::from_num(0.1),
                        lifetime: *lifetime,
                        kind: kind.clone(),
                    },
                    count,
                    spread,
                }
                .into(),
            );
        }
        Effect::Weather {
            weather,
            intensity,
            duration,
        } => {
            let intensity = to_fixed(intensity.number(cache, scope)?);
            let duration = duration.ticks(cache, scope)?;
            out.commands.push(
                CommandKind::Weather {
                    weather: *weather,
                    intensity,
                    duration,
                }
                .into(),
            );
        }
        Effect::Teleport => {
            out.commands.push(Command::move_to(source.clone(), aim.position()).from_unit(source.clone()));
        }
        Effect::Toss { distance, damage } => {
            let Some(unit) = aim.unit() else {
                return Ok(());
            };
            let mut away = (unit.position - caster.position).normalize();
            if away == Vec2Fixed::ZERO {
                away = Vec2Fixed::from_ints(1, 0);
            }
            let distance = to_fixed(distance.number(cache, scope)?);
            let damage = match damage {
                Some(d) => to_amount(d.number(cache, scope)?),
                None => 0,
            };
            out.commands.push(
                Command::from(CommandKind::Toss {
                    unit: unit.id.clone(),
                    to: unit.position + away.scale(distance),
                    damage,
                })
                .from_unit(source.clone()),
            );
        }
        Effect::Jump { duration } => {
            let duration = match duration {
                Some(d) => d.ticks(cache, scope)?,
                None => 1,
            };
            out.commands.push(
                CommandKind::Jump {
                    unit: source.clone(),
                    to: aim.position(),
                    duration,
                }
                .into(),
            );
        }
        Effect::Burrow { duration } => {
            let duration = duration.ticks(cache, scope)?;
            out.commands.push(
                CommandKind::Burrow {
                    unit: source.clone(),
                    duration,
                }
                .into(),
            );
        }
        Effect::Tame { duration } => {
            if let Some(unit) = aim.unit() {
                let duration = match duration {
                    Some(d) => Some(d.ticks(cache, scope)?),
                    None => None,
                };
                out.commands.push(
                    CommandKind::Charm {
                        unit: unit.id.clone(),
                        team: caster.team,
                        duration,
                    }
                    .into(),
                );
            }
        }
        Effect::Calm { duration } => {
            if let Some(unit) = aim.unit() {
                let until = now.saturating_add(duration.ticks(cache, scope)?);
                out.commands.push(Command::meta(unit.id.clone(), to_patch(timed(status::CALM, until))));
            }
        }
        Effect::Entangle { radius, duration } => {
            let radius = to_fixed(radius.number(cache, scope)?);
            let until = now.saturating_add(duration.ticks(cache, scope)?);
            out.events.push(
                event(EventKind::Status {
                    radius,
                    allies: false,
                })
                .with_meta(timed(status::ROOTED, until)),
            );
        }
        Effect::Cleanse => {
            if let Some(unit) = aim.unit() {
                let patch: MetaPatch = HARMFUL
                    .iter()
                    .flat_map(|name| [(name.to_string(), None), (status::until_key(name), None)])
                    .collect();
                out.commands.push(Command::meta(unit.id.clone(), patch).from_unit(source.clone()));
            }
        }
        Effect::Reveal { radius, duration } => {
            let radius = to_fixed(radius.number(cache, scope)?);
            let until = now.saturating_add(duration.ticks(cache, scope)?);
            out.events.push(
                event(EventKind::Status {
                    radius,
                    allies: false,
                })
                .with_meta(timed(status::REVEALED, until)),
            );
        }
        Effect::Knockback { force, radius } => {
            let force = to_fixed(force.number(cache, scope)?);
            match (radius, aim.unit()) {
                (Some(radius), _) => {
                    let radius = to_fixed(radius.number(cache, scope)?);
                    out.events.push(event(EventKind::Knockback { force, radius }));
                }
                (None, Some(unit)) => {
                    out.commands.push(Command::knockback(unit.id.clone(), caster.position, force).from_unit(source.clone()));
                }
                (None, None) => {}
            }
        }
    }
    Ok(())
}

impl Abilities {
    /// Evaluate every ability of the unit at `index`.
    fn run_unit(&mut self, ctx: &mut TickContext<'_>, index: usize, out: &mut Emitted) {
        let units = ctx.units();
        let unit = &units[index];
        let now = ctx.tick();
        if unit.status_active(status::STUNNED, now) || unit.status_active(status::BURROWED, now) {
            return;
        }

        let library = Rc::clone(&self.library);
        let ready: Vec<&AbilityDef> = unit
            .cold
            .abilities
            .iter()
            .filter_map(|name| {
                let def = library.get(name);
                if def.is_none() && self.warned.insert(name.clone()) {
                    tracing::warn!(unit = %unit.id, ability = %name, "Unit lists an unknown ability");
                }
                def
            })
            .filter(|def| is_ready(def, &unit.cold, now))
            .collect();
        if ready.is_empty() {
            return;
        }

        let target = default_target(ctx, unit);
        let field = ctx.field();
        let temperature = ctx.temperature_at(unit.position).to_num::<f64>();
        let humidity = ctx.humidity_at(unit.position).to_num::<f64>();
        let cast = Cast {
            caster: unit,
            units,
            now,
        };
        let mut scope = UnitScope::new(
            UnitScopeParams {
                units,
                self_index: index,
                target: target.map_or(Value::Undefined, Value::Unit),
                tick: now,
                field,
                temperature,
                humidity,
            },
            ctx.rng(),
        );

        for def in ready {
            let compiled = self.compiled(def);
            scope.set_target(target.map_or(Value::Undefined, Value::Unit));

            if compiled.trigger_broken {
                continue;
            }
            if let Some(trigger) = &compiled.trigger {
                match trigger.eval_bool(&scope) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        tracing::debug!(unit = %unit.id, ability = %def.name, error = %err, "Trigger failed");
                        continue;
                    }
                }
            }

            let mut aims = Vec::new();
            match &compiled.selector {
                Selector::Caster => aims.push(Aim::Unit(index, unit)),
                Selector::Target => {
                    if let Some(t) = target {
                        aims.push(Aim::Unit(t, &units[t]));
                    }
                }
                Selector::CasterPosition => aims.push(Aim::Point(unit.position)),
                Selector::Point(point) => aims.push(Aim::Point(*point)),
                Selector::Expr(expr) => match expr.eval(&scope) {
                    Ok(value) => aim_from_value(&value, units, &mut aims),
                    Err(err) => {
                        tracing::debug!(unit = %unit.id, ability = %def.name, error = %err, "Target selector failed");
                    }
                },
                Selector::Broken => {}
            }
            if aims.is_empty() {
                continue;
            }

            for aim in aims {
                scope.set_target(aim.value());
                for effect in &def.effects {
                    if let Err(err) = apply_effect(effect, aim, &cast, &scope, &mut self.cache, out) {
                        tracing::debug!(
                            unit = %unit.id,
                            ability = %def.name,
                            effect = effect.kind(),
                            error = %err,
                            "Effect skipped"
                        );
                    }
                }
            }
            tracing::trace!(unit = %unit.id, ability = %def.name, "Ability fired");
            out.commands.push(Command::ability_used(unit.id.clone(), def.name.clone()).from_unit(unit.id.clone()));
        }
    }
}

impl Rule for Abilities {
    fn name(&self) -> &str {
        "abilities"
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command> {
        let version = ctx.frozen().structure_version();
        if self.compiled_version != version {
            self.compiled.clear();
            self.compiled_version = version;
        }

        let mut out = Emitted::default();
        let casters: Vec<usize> = ctx
            .units()
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_alive() && !u.cold.abilities.is_empty())
            .map(|(i, _)| i)
            .collect();
        for index in casters {
            self.run_unit(ctx, index, &mut out);
        }
        for event in out.events {
            ctx.queue_event(event);
        }
        out.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;
    use crate::config::SimConfig;
    use crate::rules::test_support::Harness;
    use crate::simulation::Simulation;
    use crate::unit::{Team, UnitSpec, UnitState};

    fn library(json: &str) -> Rc<AbilityLibrary> {
        Rc::new(AbilityLibrary::from_json_str(json).unwrap())
    }

    fn roster(ability: &str) -> Vec<UnitSpec> {
        vec![
            UnitSpec::new("mage", Vec2Fixed::from_ints(5, 5))
                .with_id("mage")
                .with_hp(10)
                .with_team(Team::Friendly)
                .with_ability(ability),
            UnitSpec::new("orc", Vec2Fixed::from_ints(8, 5))
                .with_id("orc")
                .with_hp(10)
                .with_team(Team::Hostile),
        ]
    }

    fn caster_and_foe(ability: &str) -> Harness {
        Harness::new(roster(ability))
    }

    #[test]
    fn test_is_ready_cooldown_and_max_uses() {
        let def: AbilityDef = serde_json::from_str(
            r#"{"name": "zap", "cooldown": 5, "maxUses": 2, "effects": []}"#,
        )
        .unwrap();
        let mut cold = ColdData::default();
        assert!(is_ready(&def, &cold, 0));
        cold.last_used.insert("zap".into(), 10);
        cold.uses.insert("zap".into(), 1);
        assert!(!is_ready(&def, &cold, 14));
        assert!(is_ready(&def, &cold, 15));
        cold.uses.insert("zap".into(), 2);
        assert!(!is_ready(&def, &cold, 100));
    }

    #[test]
    fn test_damage_targets_closest_enemy() {
        let lib = library(r#"[{"name": "zap", "effects": [{"type": "damage", "amount": "self.hp / 2", "aspect": "shock"}]}]"#);
        let mut harness = caster_and_foe("zap");
        let (commands, events) = harness.run(&mut Abilities::new(lib), 0);
        assert!(events.is_empty());
        assert_eq!(
            commands,
            vec![
                Command::damage("orc", 5, "shock").from_unit("mage"),
                Command::ability_used("mage", "zap").from_unit("mage"),
            ]
        );
    }

    #[test]
    fn test_false_trigger_does_not_fire() {
        let lib = library(
            r#"[{"name": "zap", "trigger": "distance(target) < 2", "effects": [{"type": "damage", "amount": 1}]}]"#,
        );
        let mut harness = caster_and_foe("zap");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_failing_trigger_is_skipped() {
        let lib = library(
            r#"[{"name": "zap", "trigger": "self.nothing.deeper", "effects": [{"type": "damage", "amount": 1}]}]"#,
        );
        let mut harness = caster_and_foe("zap");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_self_target_and_area_events() {
        let lib = library(
            r#"[{"name": "nova", "target": "self.pos", "effects": [
                {"type": "aoe", "radius": 4, "damage": 6, "aspect": "fire"},
                {"type": "terrain", "terrain": "fire", "radius": 1, "duration": 10}
            ]}]"#,
        );
        let mut harness = caster_and_foe("nova");
        let (_, events) = harness.run(&mut Abilities::new(lib), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target, EventTarget::Point(Vec2Fixed::from_ints(5, 5)));
        assert_eq!(events[0].source.as_deref(), Some("mage"));
        assert_eq!(events[1].name(), "terrain");
    }

    #[test]
    fn test_expression_target_array() {
        let lib = library(
            r#"[{"name": "chain", "target": "enemies", "effects": [{"type": "damage", "amount": 2}]}]"#,
        );
        let mut harness = caster_and_foe("chain");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        assert_eq!(commands[0], Command::damage("orc", 2, "physical").from_unit("mage"));
    }

    #[test]
    fn test_null_target_does_not_fire() {
        let lib = library(
            r#"[{"name": "snipe", "target": "closest.enemy(1)", "effects": [{"type": "damage", "amount": 2}]}]"#,
        );
        let mut harness = caster_and_foe("snipe");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_buff_sets_timed_meta() {
        let lib = library(
            r#"[{"name": "rally", "target": "self", "effects": [
                {"type": "buff", "meta": {"damage_bonus": 2}, "duration": 30}
            ]}]"#,
        );
        let mut harness = caster_and_foe("rally");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 7);
        let CommandKind::Meta { unit, patch, .. } = &commands[0].kind else {
            panic!("expected meta");
        };
        assert_eq!(unit, "mage");
        assert_eq!(patch["damage_bonus"], Some(json!(2.0)));
        assert_eq!(patch["damage_bonus_until"], Some(json!(37)));
    }

    #[test]
    fn test_projectile_heads_toward_target() {
        let lib = library(
            r#"[{"name": "arrow", "effects": [{"type": "projectile", "damage": 4, "speed": 2}]}]"#,
        );
        let mut harness = caster_and_foe("arrow");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        let CommandKind::Projectile(spawn) = &commands[0].kind else {
            panic!("expected projectile");
        };
        assert_eq!(spawn.velocity, Vec2Fixed::from_ints(2, 0));
        assert_eq!(spawn.team, Team::Friendly);
        assert_eq!(spawn.damage, 4);
    }

    fn simulate(json: &str, ability: &str) -> Simulation {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        for spec in roster(ability) {
            sim.spawn(spec).unwrap();
        }
        sim.add_rule(Abilities::new(library(json)));
        sim
    }

    #[test]
    fn test_oversized_damage_amount_is_clamped() {
        let lib = library(r#"[{"name": "smite", "effects": [{"type": "damage", "amount": 1e12}]}]"#);
        let mut harness = caster_and_foe("smite");
        let (commands, _) = harness.run(&mut Abilities::new(lib), 0);
        assert_eq!(commands[0], Command::damage("orc", i32::MAX, "physical").from_unit("mage"));

        let mut sim = simulate(
            r#"[{"name": "smite", "effects": [{"type": "damage", "amount": 1e12}]}]"#,
            "smite",
        );
        sim.run(3);
        let orc = sim.unit("orc").unwrap();
        assert!(orc.hp() <= 0);
        assert_eq!(orc.state(), UnitState::Dead);
    }

    #[test]
    fn test_huge_duration_saturates_instead_of_wrapping() {
        let mut sim = simulate(
            r#"[{"name": "snare", "cooldown": 3, "effects": [{"type": "pin", "duration": 1e20}]}]"#,
            "snare",
        );
        sim.run(5);
        let now = sim.current_tick();
        let orc = sim.unit("orc").unwrap();
        assert!(orc.cold().status_active(status::ROOTED, now));
        assert_eq!(orc.meta()["rooted_until"], json!(u64::MAX));
    }

    #[test]
    fn test_unknown_ability_is_ignored() {
        let lib = library("[]");
        let mut harness = caster_and_foe("missing");
        let mut rule = Abilities::new(lib);
        let (commands, _) = harness.run(&mut rule, 0);
        assert!(commands.is_empty());
        let (commands, _) = harness.run(&mut rule, 1);
        assert!(commands.is_empty());
        assert_eq!(rule.warned.len(), 1);
    }

    #[test]
    fn test_compiled_cache_survives_ticks_until_roster_changes() {
        let lib = library(
            r#"[{"name": "zap", "trigger": "true", "effects": [{"type": "damage", "amount": 1}]}]"#,
        );
        let mut harness = caster_and_foe("zap");
        let mut rule = Abilities::new(lib);
        harness.run(&mut rule, 0);
        harness.run(&mut rule, 1);
        assert_eq!(rule.cache_stats().1, 1);
        assert_eq!(rule.compiled.len(), 1);

        harness.world.store.remove_by_id("orc");
        harness.refresh();
        harness.run(&mut rule, 2);
        assert_eq!(rule.compiled_version, harness.frozen.structure_version());
    }
}
