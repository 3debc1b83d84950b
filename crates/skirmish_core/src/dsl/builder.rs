//! Per-unit evaluation scope for ability expressions.
//!
//! Cheap bindings (`self`, `tick`, `field`, `distance`, `Math`) are
//! answered directly. The spatial selectors (`closest`, `weakest`,
//! `healthiest`, `count`, `centroid`) need the other units sorted by
//! distance; those lists are built on first use and reused for the rest
//! of the evaluation. All of them read the tick's frozen snapshot, which
//! is shared by every ability evaluated that tick.

use std::cell::{OnceCell, RefCell, RefMut};

use super::scope::Scope;
use super::value::{BoundMethod, Native, NativeNamespace, Value};
use super::EvalError;
use crate::rng::DeterministicRng;
use crate::unit::UnitSnapshot;

/// Inputs for building a [`UnitScope`].
#[derive(Debug, Clone)]
pub struct UnitScopeParams<'a> {
    /// Units frozen at the start of the tick; dead ones are skipped by selectors.
    pub units: &'a [UnitSnapshot],
    /// Index of the acting unit in `units`.
    pub self_index: usize,
    /// Resolved target, or `undefined` while the target is being chosen.
    pub target: Value,
    /// Current tick.
    pub tick: u64,
    /// Field width and height.
    pub field: (u32, u32),
    /// Temperature at the acting unit's cell.
    pub temperature: f64,
    /// Humidity at the acting unit's cell.
    pub humidity: f64,
}

/// Which side of the acting unit a selector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Enemy,
    Ally,
    Any,
}

impl Side {
    fn from_method(method: &str) -> Option<Self> {
        match method {
            "enemy" | "enemies" => Some(Side::Enemy),
            "ally" | "allies" => Some(Side::Ally),
            "unit" | "units" => Some(Side::Any),
            _ => None,
        }
    }
}

/// Scope for one unit's trigger, target and effect expressions.
pub struct UnitScope<'a> {
    params: UnitScopeParams<'a>,
    rng: RefCell<&'a mut DeterministicRng>,
    /// `(index, distance)` sorted by distance then index.
    enemies: OnceCell<Vec<(usize, f64)>>,
    allies: OnceCell<Vec<(usize, f64)>>,
    others: OnceCell<Vec<(usize, f64)>>,
}

impl<'a> UnitScope<'a> {
    /// Build a scope; no selector work happens until an expression asks.
    pub fn new(params: UnitScopeParams<'a>, rng: &'a mut DeterministicRng) -> Self {
        Self {
            params,
            rng: RefCell::new(rng),
            enemies: OnceCell::new(),
            allies: OnceCell::new(),
            others: OnceCell::new(),
        }
    }

    /// Replace the target binding.
    pub fn set_target(&mut self, target: Value) {
        self.params.target = target;
    }

    /// The acting unit.
    #[must_use]
    pub fn me(&self) -> &UnitSnapshot {
        &self.params.units[self.params.self_index]
    }

    /// Snapshot behind a unit handle.
    #[must_use]
    pub fn unit(&self, handle: usize) -> Option<&'a UnitSnapshot> {
        self.params.units.get(handle)
    }

    /// Whether the selector lists have been realized.
    #[must_use]
    pub fn selectors_built(&self) -> bool {
        self.enemies.get().is_some() || self.allies.get().is_some() || self.others.get().is_some()
    }

    fn sorted(&self, side: Side) -> &[(usize, f64)] {
        let cell = match side {
            Side::Enemy => &self.enemies,
            Side::Ally => &self.allies,
            Side::Any => &self.others,
        };
        cell.get_or_init(|| {
            let me = self.me();
            let origin = me.position;
            let mut list: Vec<(usize, f64)> = self
                .params
                .units
                .iter()
                .enumerate()
                .filter(|(i, u)| *i != self.params.self_index && u.is_alive())
                .filter(|(_, u)| match side {
                    Side::Enemy => me.team.is_enemy_of(u.team),
                    Side::Ally => me.team.is_ally_of(u.team),
                    Side::Any => true,
                })
                .map(|(i, u)| (i, u.position.distance(origin).to_num::<f64>()))
                .collect();
            list.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            list
        })
    }

    fn in_range(&self, side: Side, args: &[Value]) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = args
            .first()
            .and_then(Value::as_number)
            .unwrap_or(f64::INFINITY);
        self.sorted(side)
            .iter()
            .copied()
            .take_while(move |(_, d)| *d <= range)
    }

    fn position_of(&self, value: &Value) -> Option<(f64, f64)> {
        match value {
            Value::Unit(handle) => self.unit(*handle).map(|u| u.position.to_f64()),
            Value::Object(map) => {
                let x = map.get("x")?.as_number()?;
                let y = map.get("y")?.as_number()?;
                Some((x, y))
            }
            _ => None,
        }
    }

    fn selector(&self, namespace: NativeNamespace, method: &str, args: &[Value]) -> Value {
        let Some(side) = Side::from_method(method) else {
            return Value::Undefined;
        };
        let units = self.params.units;
        match namespace {
            NativeNamespace::Closest => self
                .in_range(side, args)
                .next()
                .map_or(Value::Undefined, |(i, _)| Value::Unit(i)),
            NativeNamespace::Weakest => self
                .in_range(side, args)
                .min_by_key(|(i, _)| units[*i].hp)
                .map_or(Value::Undefined, |(i, _)| Value::Unit(i)),
            NativeNamespace::Healthiest => self
                .in_range(side, args)
                // `min_by_key` keeps the first of equal keys, i.e. the nearest.
                .min_by_key(|(i, _)| std::cmp::Reverse(units[*i].hp))
                .map_or(Value::Undefined, |(i, _)| Value::Unit(i)),
            NativeNamespace::Count => Value::Number(self.in_range(side, args).count() as f64),
            NativeNamespace::Centroid => {
                let (mut sx, mut sy, mut n) = (0.0, 0.0, 0.0);
                for (i, _) in self.in_range(side, args) {
                    let (x, y) = units[i].position.to_f64();
                    sx += x;
                    sy += y;
                    n += 1.0;
                }
                if n == 0.0 {
                    Value::Undefined
                } else {
                    Value::point(sx / n, sy / n)
                }
            }
            NativeNamespace::Math | NativeNamespace::Random => Value::Undefined,
        }
    }
}

impl Scope for UnitScope<'_> {
    fn lookup(&self, name: &str) -> Value {
        match name {
            "self" | "me" => Value::Unit(self.params.self_index),
            "target" => self.params.target.clone(),
            "tick" => Value::Number(self.params.tick as f64),
            "field" => Value::object([
                ("width", Value::Number(f64::from(self.params.field.0))),
                ("height", Value::Number(f64::from(self.params.field.1))),
            ]),
            "temperature" => Value::Number(self.params.temperature),
            "humidity" => Value::Number(self.params.humidity),
            "Math" | "math" => Value::Native(Native::Math),
            "random" => Value::Native(Native::Random),
            "closest" => Value::Native(Native::Closest),
            "weakest" => Value::Native(Native::Weakest),
            "healthiest" => Value::Native(Native::Healthiest),
            "count" => Value::Native(Native::Count),
            "centroid" => Value::Native(Native::Centroid),
            "distance" => Value::Native(Native::Distance),
            "enemies" => handles(self.sorted(Side::Enemy)),
            "allies" => handles(self.sorted(Side::Ally)),
            "units" => Value::array((0..self.params.units.len()).map(Value::Unit).collect()),
            _ => Value::Undefined,
        }
    }

    fn unit_property(&self, handle: usize, key: &str) -> Value {
        let Some(unit) = self.unit(handle) else {
            return Value::Undefined;
        };
        let (x, y) = unit.position.to_f64();
        match key {
            "id" => Value::str(&unit.id),
            "x" => Value::Number(x),
            "y" => Value::Number(y),
            "pos" | "position" => Value::point(x, y),
            "hp" => Value::from(unit.hp),
            "maxHp" | "max_hp" => Value::from(unit.max_hp),
            "hpRatio" | "hp_ratio" => {
                if unit.max_hp > 0 {
                    Value::Number(f64::from(unit.hp) / f64::from(unit.max_hp))
                } else {
                    Value::Number(0.0)
                }
            }
            "damage" => Value::from(unit.damage),
            "mass" => Value::Number(unit.mass.to_num()),
            "team" => Value::str(unit.team.as_str()),
            "state" => Value::str(unit.state.as_str()),
            "alive" => Value::Bool(unit.is_alive()),
            "sprite" => Value::str(&unit.cold.sprite),
            "tags" => Value::array(unit.cold.tags.iter().map(|t| Value::str(t)).collect()),
            "abilities" => {
                Value::array(unit.cold.abilities.iter().map(|a| Value::str(a)).collect())
            }
            "meta" => Value::Object(std::rc::Rc::new(
                unit.cold
                    .meta
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
            _ => Value::Undefined,
        }
    }

    fn call_unit_method(
        &self,
        handle: usize,
        method: &str,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        let Some(unit) = self.unit(handle) else {
            return Ok(Value::Undefined);
        };
        let other = args.first().cloned().unwrap_or_default();
        Ok(match method {
            "hasTag" | "has_tag" => Value::Bool(other.as_str().is_some_and(|t| unit.has_tag(t))),
            "distanceTo" | "distance_to" => {
                let (x, y) = unit.position.to_f64();
                self.position_of(&other)
                    .map_or(Value::Undefined, |(ox, oy)| {
                        Value::Number((ox - x).hypot(oy - y))
                    })
            }
            "isEnemy" | "is_enemy" => Value::Bool(match other {
                Value::Unit(o) => self.unit(o).is_some_and(|o| unit.team.is_enemy_of(o.team)),
                _ => false,
            }),
            "isAlly" | "is_ally" => Value::Bool(match other {
                Value::Unit(o) => self.unit(o).is_some_and(|o| unit.team.is_ally_of(o.team)),
                _ => false,
            }),
            _ => return Err(EvalError::NotAFunction(format!("unit.{method}"))),
        })
    }

    fn call_native(&self, native: Native, args: &[Value]) -> Result<Value, EvalError> {
        match native {
            Native::Distance => {
                let a = args.first().cloned().unwrap_or_default();
                let (from, to) = match args.get(1) {
                    Some(b) => (self.position_of(&a), self.position_of(b)),
                    None => (Some(self.me().position.to_f64()), self.position_of(&a)),
                };
                Ok(match (from, to) {
                    (Some((x1, y1)), Some((x2, y2))) => Value::Number((x2 - x1).hypot(y2 - y1)),
                    _ => Value::Undefined,
                })
            }
            Native::Method(BoundMethod { namespace, method }) => {
                Ok(self.selector(namespace, method, args))
            }
            other => Err(EvalError::NotAFunction(format!("{other:?}"))),
        }
    }

    fn rng(&self) -> RefMut<'_, DeterministicRng> {
        RefMut::map(self.rng.borrow_mut(), |r| &mut **r)
    }
}

fn handles(list: &[(usize, f64)]) -> Value {
    Value::array(list.iter().map(|(i, _)| Value::Unit(*i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::compile;
    use crate::math::Vec2Fixed;
    use crate::store::UnitStore;
    use crate::unit::{Team, UnitSpec};

    fn snapshot() -> Vec<UnitSnapshot> {
        let mut store = UnitStore::new(8);
        let specs = [
            ("hero", 0, 0, 20, Team::Friendly),
            ("near", 2, 0, 8, Team::Hostile),
            ("far", 6, 0, 3, Team::Hostile),
            ("buddy", 0, 1, 15, Team::Friendly),
        ];
        for (id, x, y, hp, team) in specs {
            store
                .add(
                    UnitSpec::new("dummy", Vec2Fixed::from_ints(x, y))
                        .with_id(id)
                        .with_hp(hp)
                        .with_team(team)
                        .with_tag(id),
                )
                .unwrap();
        }
        store.snapshot()
    }

    fn eval(units: &[UnitSnapshot], source: &str) -> Value {
        let mut rng = DeterministicRng::new(1);
        let scope = UnitScope::new(
            UnitScopeParams {
                units,
                self_index: 0,
                target: Value::Undefined,
                tick: 42,
                field: (20, 10),
                temperature: 20.0,
                humidity: 50.0,
            },
            &mut rng,
        );
        compile(source).unwrap().eval(&scope).unwrap()
    }

    #[test]
    fn test_self_properties() {
        let units = snapshot();
        assert_eq!(eval(&units, "self.hp"), Value::Number(20.0));
        assert_eq!(eval(&units, "self.team"), Value::str("friendly"));
        assert_eq!(eval(&units, "self.pos.x + self.pos.y"), Value::Number(0.0));
        assert_eq!(eval(&units, "tick + field.width"), Value::Number(62.0));
        assert_eq!(eval(&units, "self.hasTag('hero')"), Value::Bool(true));
    }

    #[test]
    fn test_selectors() {
        let units = snapshot();
        assert_eq!(eval(&units, "closest.enemy().id"), Value::str("near"));
        assert_eq!(eval(&units, "weakest.enemy().id"), Value::str("far"));
        assert_eq!(eval(&units, "weakest.enemy(3).id"), Value::str("near"));
        assert_eq!(eval(&units, "healthiest.unit().id"), Value::str("buddy"));
        assert_eq!(eval(&units, "closest.ally().id"), Value::str("buddy"));
        assert_eq!(eval(&units, "count.enemies()"), Value::Number(2.0));
        assert_eq!(eval(&units, "count.enemies(5)"), Value::Number(1.0));
        assert_eq!(eval(&units, "centroid.enemies().x"), Value::Number(4.0));
    }

    #[test]
    fn test_missing_selector_result_chains_to_undefined() {
        let units = snapshot();
        assert_eq!(eval(&units, "closest.enemy(1)?.hp"), Value::Undefined);
        assert_eq!(eval(&units, "centroid.allies(0.5)"), Value::Undefined);
    }

    #[test]
    fn test_distance_helper() {
        let units = snapshot();
        assert_eq!(eval(&units, "distance(closest.enemy())"), Value::Number(2.0));
        assert_eq!(eval(&units, "distance({x: 3, y: 4})"), Value::Number(5.0));
        assert_eq!(
            eval(&units, "distance({x: 0, y: 0}, {x: 6, y: 8})"),
            Value::Number(10.0)
        );
    }

    #[test]
    fn test_selectors_are_lazy() {
        let units = snapshot();
        let mut rng = DeterministicRng::new(1);
        let scope = UnitScope::new(
            UnitScopeParams {
                units: &units,
                self_index: 0,
                target: Value::Undefined,
                tick: 0,
                field: (20, 10),
                temperature: 20.0,
                humidity: 50.0,
            },
            &mut rng,
        );
        compile("self.hp > 1").unwrap().eval(&scope).unwrap();
        assert!(!scope.selectors_built());
        compile("count.enemies()").unwrap().eval(&scope).unwrap();
        assert!(scope.selectors_built());
    }
}
