//! Tree-walking evaluator.

use std::rc::Rc;

use super::ast::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};
use super::scope::Scope;
use super::value::{format_number, BoundMethod, Native, NativeNamespace, Value};
use super::EvalError;

/// Evaluate an expression tree against a scope.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    Ok(eval_chain(expr, scope)?.unwrap_or_default())
}

/// Evaluate a member/index/call chain. `None` means an optional link hit
/// a nullish receiver and the rest of the chain is skipped.
fn eval_chain(expr: &Expr, scope: &dyn Scope) -> Result<Option<Value>, EvalError> {
    match expr {
        Expr::Member {
            object,
            property,
            optional,
        } => {
            let Some(receiver) = receiver(object, property, *optional, scope)? else {
                return Ok(None);
            };
            Ok(Some(get_property(&receiver, property, scope)))
        }
        Expr::Index {
            object,
            index,
            optional,
        } => {
            let Some(target) = eval_chain(object, scope)? else {
                return Ok(None);
            };
            let key = evaluate(index, scope)?;
            if target.is_nullish() {
                if *optional {
                    return Ok(None);
                }
                return Err(EvalError::NullishReceiver {
                    property: key.to_string(),
                    receiver: target.type_name(),
                });
            }
            Ok(Some(get_index(&target, &key, scope)))
        }
        Expr::Call {
            callee,
            args,
            optional,
        } => {
            if let Expr::Member {
                object,
                property,
                optional: member_optional,
            } = callee.as_ref()
            {
                let Some(receiver) = receiver(object, property, *member_optional, scope)? else {
                    return Ok(None);
                };
                let args = eval_args(args, scope)?;
                return call_method(&receiver, property, &args, *optional, scope);
            }

            let Some(function) = eval_chain(callee, scope)? else {
                return Ok(None);
            };
            if *optional && function.is_nullish() {
                return Ok(None);
            }
            let args = eval_args(args, scope)?;
            call_value(&function, &args, scope).map(Some)
        }
        other => eval_plain(other, scope).map(Some),
    }
}

fn receiver(
    object: &Expr,
    property: &str,
    optional: bool,
    scope: &dyn Scope,
) -> Result<Option<Value>, EvalError> {
    let Some(value) = eval_chain(object, scope)? else {
        return Ok(None);
    };
    if value.is_nullish() {
        if optional {
            return Ok(None);
        }
        return Err(EvalError::NullishReceiver {
            property: property.to_string(),
            receiver: value.type_name(),
        });
    }
    Ok(Some(value))
}

fn eval_args(args: &[Expr], scope: &dyn Scope) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|a| evaluate(a, scope)).collect()
}

fn eval_plain(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Undefined => Value::Undefined,
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::str(s),
        }),
        Expr::Ident(name) => Ok(scope.lookup(name)),
        Expr::Array(items) => Ok(Value::array(eval_args(items, scope)?)),
        Expr::Object(fields) => {
            let mut map = std::collections::BTreeMap::new();
            for (key, value) in fields {
                map.insert(key.clone(), evaluate(value, scope)?);
            }
            Ok(Value::Object(Rc::new(map)))
        }
        Expr::Unary { op, expr } => {
            let value = evaluate(expr, scope)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
            })
        }
        Expr::Logical { op, lhs, rhs } => {
            let left = evaluate(lhs, scope)?;
            match (op, left.truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => evaluate(rhs, scope),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = evaluate(lhs, scope)?;
            let right = evaluate(rhs, scope)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => evaluate(expr, scope),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::str(&format!("{left}{right}")),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            // NaN compares false in every direction.
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn get_property(target: &Value, key: &str, scope: &dyn Scope) -> Value {
    match target {
        Value::Native(native) => match (native, key) {
            (Native::Math, "PI") => Value::Number(std::f64::consts::PI),
            (Native::Math, "E") => Value::Number(std::f64::consts::E),
            _ => native.method(key).map(Value::Native).unwrap_or_default(),
        },
        Value::Unit(handle) => scope.unit_property(*handle, key),
        Value::Array(items) => match key {
            "length" => Value::Number(items.len() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
        },
        Value::Str(s) => match key {
            "length" => Value::Number(s.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(&c.to_string()))
                .unwrap_or_default(),
        },
        Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) => Value::Undefined,
    }
}

fn get_index(target: &Value, key: &Value, scope: &dyn Scope) -> Value {
    let key = match key {
        Value::Number(n) => format_number(*n),
        other => other.to_string(),
    };
    get_property(target, &key, scope)
}

fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
    optional: bool,
    scope: &dyn Scope,
) -> Result<Option<Value>, EvalError> {
    let not_a_function = || EvalError::NotAFunction(format!("{}.{name}", receiver.type_name()));

    match receiver {
        Value::Native(native) => match native.method(name) {
            Some(method) => call_value(&Value::Native(method), args, scope).map(Some),
            None if optional => Ok(None),
            None => Err(not_a_function()),
        },
        Value::Unit(handle) => scope.call_unit_method(*handle, name, args).map(Some),
        Value::Array(items) => array_method(items, name, args)
            .map(Some)
            .ok_or_else(not_a_function),
        Value::Str(s) => string_method(s, name, args)
            .map(Some)
            .ok_or_else(not_a_function),
        Value::Object(map) => match map.get(name) {
            Some(function @ Value::Native(_)) => call_value(function, args, scope).map(Some),
            None | Some(Value::Undefined | Value::Null) if optional => Ok(None),
            _ => Err(not_a_function()),
        },
        _ if optional => Ok(None),
        _ => Err(not_a_function()),
    }
}

fn call_value(function: &Value, args: &[Value], scope: &dyn Scope) -> Result<Value, EvalError> {
    match function {
        Value::Native(Native::Method(BoundMethod {
            namespace: NativeNamespace::Math,
            method,
        })) => math(method, args, scope),
        Value::Native(Native::Method(BoundMethod {
            namespace: NativeNamespace::Random,
            method,
        })) => random(method, args, scope),
        Value::Native(native @ (Native::Distance | Native::Method(_))) => {
            scope.call_native(*native, args)
        }
        other => Err(EvalError::NotAFunction(other.type_name().to_string())),
    }
}

fn arg(args: &[Value], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, Value::to_number)
}

fn math(method: &str, args: &[Value], scope: &dyn Scope) -> Result<Value, EvalError> {
    let x = arg(args, 0);
    let n = match method {
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "sqrt" => x.sqrt(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "pow" => x.powf(arg(args, 1)),
        "hypot" => x.hypot(arg(args, 1)),
        "min" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(v) }),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(v) }),
        "clamp" => {
            let (lo, hi) = (arg(args, 1), arg(args, 2));
            if lo > hi {
                return Err(EvalError::BadArgument {
                    function: "Math.clamp".to_string(),
                    message: format!("min {lo} > max {hi}"),
                });
            }
            x.max(lo).min(hi)
        }
        "random" => scope.rng().next_f64(),
        _ => return Err(EvalError::NotAFunction(format!("Math.{method}"))),
    };
    Ok(Value::Number(n))
}

fn random(method: &str, args: &[Value], scope: &dyn Scope) -> Result<Value, EvalError> {
    let mut rng = scope.rng();
    Ok(match method {
        "float" => {
            let (min, max) = match args.len() {
                0 => (0.0, 1.0),
                1 => (0.0, arg(args, 0)),
                _ => (arg(args, 0), arg(args, 1)),
            };
            Value::Number(rng.range(min, max))
        }
        "int" => {
            let (min, max) = (arg(args, 0), arg(args, 1));
            if !min.is_finite() || !max.is_finite() {
                return Err(EvalError::BadArgument {
                    function: "random.int".to_string(),
                    message: "bounds must be finite numbers".to_string(),
                });
            }
            Value::Number(rng.range_int(min as i64, max as i64) as f64)
        }
        "chance" => Value::Bool(rng.chance(arg(args, 0))),
        "pick" => match args.first() {
            Some(Value::Array(items)) => rng.pick(items).cloned().unwrap_or_default(),
            _ => {
                return Err(EvalError::BadArgument {
                    function: "random.pick".to_string(),
                    message: "expected an array".to_string(),
                })
            }
        },
        _ => return Err(EvalError::NotAFunction(format!("random.{method}"))),
    })
}

fn array_method(items: &[Value], name: &str, args: &[Value]) -> Option<Value> {
    let needle = args.first().cloned().unwrap_or_default();
    Some(match name {
        "includes" => Value::Bool(items.iter().any(|v| v.strict_eq(&needle))),
        "indexOf" => Value::Number(
            items
                .iter()
                .position(|v| v.strict_eq(&needle))
                .map_or(-1.0, |i| i as f64),
        ),
        "join" => {
            let sep = args.first().map_or(",".to_string(), ToString::to_string);
            Value::str(
                &items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        _ => return None,
    })
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Value> {
    let needle = args.first().map(ToString::to_string).unwrap_or_default();
    Some(match name {
        "includes" => Value::Bool(s.contains(needle.as_str())),
        "startsWith" => Value::Bool(s.starts_with(needle.as_str())),
        "endsWith" => Value::Bool(s.ends_with(needle.as_str())),
        "toUpperCase" => Value::str(&s.to_uppercase()),
        "toLowerCase" => Value::str(&s.to_lowercase()),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::super::{compile, MapScope};
    use super::*;
    use crate::rng::DeterministicRng;

    fn eval_in(source: &str, scope: &MapScope) -> Value {
        compile(source).unwrap().eval(scope).unwrap()
    }

    fn eval(source: &str) -> Value {
        eval_in(source, &MapScope::new())
    }

    #[test]
    fn test_short_circuit_returns_operands() {
        assert_eq!(eval("0 || 'x'"), Value::str("x"));
        assert_eq!(eval("'a' && 5"), Value::Number(5.0));
        assert_eq!(eval("null && missing.deep"), Value::Null);
        assert_eq!(eval("1 || missing.deep"), Value::Number(1.0));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval("'hp:' + 10"), Value::str("hp:10"));
        assert_eq!(eval("1 + 2 + 'x'"), Value::str("3x"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("3 >= 3 && 2 < 3 && 'a' < 'b'"), Value::Bool(true));
        assert_eq!(eval("undefined < 1"), Value::Bool(false));
        assert_eq!(eval("null == undefined"), Value::Bool(true));
        assert_eq!(eval("null === undefined"), Value::Bool(false));
        assert_eq!(eval("!0"), Value::Bool(true));
    }

    #[test]
    fn test_collections() {
        assert_eq!(eval("[1, 2, 3].length"), Value::Number(3.0));
        assert_eq!(eval("[1, 2, 3][1]"), Value::Number(2.0));
        assert_eq!(eval("[1, 2].includes(2)"), Value::Bool(true));
        assert_eq!(eval("{a: {b: 4}}.a.b"), Value::Number(4.0));
        assert_eq!(eval("{a: 1}['a']"), Value::Number(1.0));
        assert_eq!(eval("'fire'.startsWith('fi')"), Value::Bool(true));
    }

    #[test]
    fn test_math() {
        assert_eq!(eval("Math.max(1, 5, 3)"), Value::Number(5.0));
        assert_eq!(eval("math.min(4, 2)"), Value::Number(2.0));
        assert_eq!(eval("Math.floor(2.7) + Math.abs(-1)"), Value::Number(3.0));
        assert_eq!(eval("Math.clamp(15, 0, 10)"), Value::Number(10.0));
        assert_eq!(eval("Math.round(2.5)"), Value::Number(3.0));
    }

    #[test]
    fn test_random_uses_scope_rng() {
        let scope = MapScope::new().with_rng(DeterministicRng::new(0));
        let first = eval_in("random.float()", &scope);
        assert_eq!(first, Value::Number(1_013_904_223.0 / 4_294_967_296.0));

        let scope = MapScope::new().with_rng(DeterministicRng::new(0));
        let roll = eval_in("random.int(1, 6)", &scope).as_number().unwrap();
        assert!((1.0..=6.0).contains(&roll));
    }

    #[test]
    fn test_random_int_with_huge_bounds() {
        let scope = MapScope::new().with_rng(DeterministicRng::new(5));
        for _ in 0..20 {
            let roll = eval_in("random.int(-9e18, 9e18)", &scope).as_number().unwrap();
            assert!((-9e18..=9e18).contains(&roll));
        }
        let roll = eval_in("random.int(-1e300, 1e300)", &scope).as_number().unwrap();
        assert!(roll.is_finite());
    }

    #[test]
    fn test_bindings_and_unknown_names() {
        let scope = MapScope::new().with("hp", Value::Number(3.0));
        assert_eq!(eval_in("hp * 2", &scope), Value::Number(6.0));
        assert_eq!(eval_in("nope", &scope), Value::Undefined);
        assert_eq!(eval_in("nope == null", &scope), Value::Bool(true));
    }

    #[test]
    fn test_calling_non_function_errors() {
        let err = compile("(5)()").unwrap().eval(&MapScope::new()).unwrap_err();
        assert_eq!(err, EvalError::NotAFunction("number".to_string()));

        let err = compile("Math.nope(1)").unwrap().eval(&MapScope::new()).unwrap_err();
        assert!(matches!(err, EvalError::NotAFunction(_)));
        assert_eq!(eval("Math.nope?.(1)"), Value::Undefined);
    }
}
