//! Name resolution for expression evaluation.

use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;

use super::value::{Native, Value};
use super::EvalError;
use crate::rng::DeterministicRng;

/// Everything an expression can see beyond its own literals.
///
/// Pure built-ins (`Math.*`, array and string methods) are handled by the
/// evaluator; a scope supplies names, unit data, the spatial helper
/// namespaces and the random source.
pub trait Scope {
    /// Resolve a free identifier. Unknown names resolve to `undefined`.
    fn lookup(&self, name: &str) -> Value;

    /// Read a property of a unit handle.
    fn unit_property(&self, _unit: usize, _key: &str) -> Value {
        Value::Undefined
    }

    /// Call a method on a unit handle.
    fn call_unit_method(
        &self,
        _unit: usize,
        method: &str,
        _args: &[Value],
    ) -> Result<Value, EvalError> {
        Err(EvalError::NotAFunction(format!("unit.{method}")))
    }

    /// Call a scope-provided native (`distance`, `closest.enemy`, ...).
    fn call_native(&self, native: Native, _args: &[Value]) -> Result<Value, EvalError> {
        Err(EvalError::NotAFunction(format!("{native:?}")))
    }

    /// The random source behind `random.*` and `Math.random`.
    fn rng(&self) -> RefMut<'_, DeterministicRng>;
}

/// A scope backed by a plain name map. Used for content validation and
/// for expressions that only read literal parameters.
#[derive(Debug, Default)]
pub struct MapScope {
    vars: BTreeMap<String, Value>,
    rng: RefCell<DeterministicRng>,
}

impl MapScope {
    /// Empty scope with the default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// Replace the random source.
    #[must_use]
    pub fn with_rng(mut self, rng: DeterministicRng) -> Self {
        self.rng = RefCell::new(rng);
        self
    }
}

impl Scope for MapScope {
    fn lookup(&self, name: &str) -> Value {
        match name {
            "Math" | "math" => Value::Native(Native::Math),
            "random" => Value::Native(Native::Random),
            _ => self.vars.get(name).cloned().unwrap_or_default(),
        }
    }

    fn rng(&self) -> RefMut<'_, DeterministicRng> {
        self.rng.borrow_mut()
    }
}
