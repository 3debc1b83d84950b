//! Runtime values of the expression language.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

/// Built-in namespaces and functions provided by a [`Scope`](super::Scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Native {
    /// `Math` / `math`.
    Math,
    /// `random`.
    Random,
    /// `closest`.
    Closest,
    /// `weakest`.
    Weakest,
    /// `healthiest`.
    Healthiest,
    /// `count`.
    Count,
    /// `centroid`.
    Centroid,
    /// `distance(a, b?)`.
    Distance,
    /// A method looked up on a namespace but not yet called.
    Method(BoundMethod),
}

/// A `namespace.method` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundMethod {
    /// Owning namespace.
    pub namespace: NativeNamespace,
    /// Interned method name.
    pub method: &'static str,
}

/// Namespaces that carry callable methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeNamespace {
    /// `Math`.
    Math,
    /// `random`.
    Random,
    /// `closest`.
    Closest,
    /// `weakest`.
    Weakest,
    /// `healthiest`.
    Healthiest,
    /// `count`.
    Count,
    /// `centroid`.
    Centroid,
}

impl NativeNamespace {
    /// Methods this namespace answers to.
    #[must_use]
    pub fn methods(self) -> &'static [&'static str] {
        match self {
            NativeNamespace::Math => &[
                "abs", "min", "max", "floor", "ceil", "round", "sqrt", "pow", "clamp", "sign",
                "random", "hypot",
            ],
            NativeNamespace::Random => &["float", "int", "chance", "pick"],
            NativeNamespace::Closest | NativeNamespace::Weakest | NativeNamespace::Healthiest => {
                &["enemy", "ally", "unit"]
            }
            NativeNamespace::Count | NativeNamespace::Centroid => &["enemies", "allies", "units"],
        }
    }
}

impl Native {
    /// Namespace behind a namespace handle.
    #[must_use]
    pub fn namespace(self) -> Option<NativeNamespace> {
        match self {
            Native::Math => Some(NativeNamespace::Math),
            Native::Random => Some(NativeNamespace::Random),
            Native::Closest => Some(NativeNamespace::Closest),
            Native::Weakest => Some(NativeNamespace::Weakest),
            Native::Healthiest => Some(NativeNamespace::Healthiest),
            Native::Count => Some(NativeNamespace::Count),
            Native::Centroid => Some(NativeNamespace::Centroid),
            Native::Distance | Native::Method(_) => None,
        }
    }

    /// Resolve `namespace.key` to a bound method, if it exists.
    #[must_use]
    pub fn method(self, key: &str) -> Option<Native> {
        let namespace = self.namespace()?;
        namespace
            .methods()
            .iter()
            .find(|m| **m == key)
            .map(|m| Native::Method(BoundMethod { namespace, method: m }))
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Missing value.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    Str(Rc<str>),
    /// Array.
    Array(Rc<Vec<Value>>),
    /// Object with ordered keys.
    Object(Rc<BTreeMap<String, Value>>),
    /// Handle to a unit in the evaluation scope's snapshot.
    Unit(usize),
    /// Built-in namespace or function.
    Native(Native),
}

impl Value {
    /// String value.
    #[must_use]
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Object value from key/value pairs.
    #[must_use]
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// `{x, y}` point object.
    #[must_use]
    pub fn point(x: f64, y: f64) -> Self {
        Value::object([("x", Value::Number(x)), ("y", Value::Number(y))])
    }

    /// Array value.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    /// `undefined` or `null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// JavaScript-style truthiness.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Unit(_) | Value::Native(_) => true,
        }
    }

    /// Numeric coercion; non-numeric values become NaN.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Undefined
            | Value::Array(_)
            | Value::Object(_)
            | Value::Unit(_)
            | Value::Native(_) => f64::NAN,
        }
    }

    /// Number if this is a finite number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Borrowed string if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `typeof`-like name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Unit(_) => "unit",
            Value::Native(Native::Distance | Native::Method(_)) => "function",
            Value::Native(_) => "namespace",
        }
    }

    /// Strict equality (`===`).
    #[must_use]
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Unit(a), Value::Unit(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    /// Loose equality (`==`): `null == undefined`, and numbers compare
    /// against numeric strings and booleans.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_) | Value::Bool(_), Value::Str(_) | Value::Bool(_))
            | (Value::Str(_) | Value::Bool(_), Value::Number(_))
            | (Value::Str(_), Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    /// Convert from a JSON metadata value.
    #[must_use]
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::str(s),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Object(Rc::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
        }
    }

    /// Convert to JSON for storage in metadata. `undefined`, unit handles
    /// and natives have no JSON form and yield `None`; non-finite numbers
    /// become `null`.
    #[must_use]
    pub fn to_json(&self) -> Option<Json> {
        Some(match self {
            Value::Undefined | Value::Unit(_) | Value::Native(_) => return None,
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Value::Str(s) => Json::String(s.to_string()),
            Value::Array(items) => {
                Json::Array(items.iter().map(|v| v.to_json().unwrap_or(Json::Null)).collect())
            }
            Value::Object(map) => Json::Object(
                map.iter()
                    .filter_map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect(),
            ),
        })
    }
}

/// Format a number the way a script author expects: integers without a
/// trailing `.0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Unit(handle) => write!(f, "[unit {handle}]"),
            Value::Native(native) => write!(f, "[native {native:?}]"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => self.strict_eq(other),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("0").truthy());
        assert!(Value::array(vec![]).truthy());
    }

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(Value::Number(1.0).loose_eq(&Value::str("1")));
        assert!(!Value::Number(1.0).strict_eq(&Value::str("1")));
        assert!(Value::Bool(true).loose_eq(&Value::Number(1.0)));
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from_json(&json!({"a": [1, "b", null], "c": true}));
        assert_eq!(value.to_json(), Some(json!({"a": [1.0, "b", null], "c": true})));
        assert_eq!(Value::Undefined.to_json(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(7.0).to_string(), "7");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(
            Value::array(vec![1.into(), Value::Null, "x".into()]).to_string(),
            "1,,x"
        );
    }

    #[test]
    fn test_namespace_methods() {
        assert!(Native::Closest.method("enemy").is_some());
        assert!(Native::Closest.method("enemies").is_none());
        assert!(Native::Count.method("enemies").is_some());
        assert!(Native::Distance.method("x").is_none());
    }
}
