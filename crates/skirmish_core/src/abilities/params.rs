//! Effect parameters: literals, expressions and micro-directives.

use serde::{Deserialize, Serialize};

use crate::dsl::{ExpressionCache, Scope, Value};
use crate::error::{Result, SimError};

/// `{"$conditional": {"if": ..., "then": ..., "else": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    /// Condition expression.
    #[serde(rename = "if")]
    pub condition: String,
    /// Value when the condition is truthy.
    pub then: Param,
    /// Value otherwise; `undefined` when absent.
    #[serde(rename = "else", default)]
    pub otherwise: Option<Param>,
}

/// A value in ability content that is resolved when the effect fires.
///
/// ```json
/// 5
/// "self.damage * 2"
/// {"$random": [2, 6]}
/// {"$random": ["fire", "ice", "mud"]}
/// {"$conditional": {"if": "target.hp < 5", "then": 10, "else": 3}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// Numeric literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// Uniform draw: two numbers give a range, anything else a choice.
    Random {
        /// Bounds or choices.
        #[serde(rename = "$random")]
        random: Vec<Param>,
    },
    /// Branch on an expression.
    Conditional {
        /// Branches.
        #[serde(rename = "$conditional")]
        conditional: Box<Conditional>,
    },
    /// Expression source.
    Text(String),
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Number(value)
    }
}

impl Param {
    /// Resolve to a value.
    ///
    /// # Errors
    ///
    /// Parse and evaluation failures of embedded expressions.
    pub fn resolve(&self, cache: &mut ExpressionCache, scope: &dyn Scope) -> Result<Value> {
        match self {
            Param::Number(n) => Ok(Value::Number(*n)),
            Param::Bool(b) => Ok(Value::Bool(*b)),
            Param::Text(source) => Ok(cache.compile(source)?.eval(scope)?),
            Param::Random { random } => match random.as_slice() {
                [Param::Number(min), Param::Number(max)] => {
                    Ok(Value::Number(scope.rng().range(*min, *max)))
                }
                [] => Ok(Value::Undefined),
                choices => {
                    let index = scope.rng().pick_index(choices.len()).unwrap_or(0);
                    choices[index].resolve(cache, scope)
                }
            },
            Param::Conditional { conditional } => {
                let condition = cache.compile(&conditional.condition)?.eval_bool(scope)?;
                if condition {
                    conditional.then.resolve(cache, scope)
                } else {
                    conditional
                        .otherwise
                        .as_ref()
                        .map_or(Ok(Value::Undefined), |p| p.resolve(cache, scope))
                }
            }
        }
    }

    /// Resolve to a number.
    ///
    /// # Errors
    ///
    /// As [`resolve`](Self::resolve), plus [`SimError::Eval`] when the
    /// result is not numeric.
    pub fn number(&self, cache: &mut ExpressionCache, scope: &dyn Scope) -> Result<f64> {
        let value = self.resolve(cache, scope)?;
        let n = value.to_number();
        if n.is_nan() {
            return Err(SimError::Eval(format!(
                "expected a number, got {}",
                value.type_name()
            )));
        }
        Ok(n)
    }

    /// Resolve to a whole number of ticks (or a count), clamped at zero.
    ///
    /// # Errors
    ///
    /// As [`number`](Self::number).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ticks(&self, cache: &mut ExpressionCache, scope: &dyn Scope) -> Result<u64> {
        Ok(self.number(cache, scope)?.round().max(0.0) as u64)
    }

    /// Collect every expression source reachable from this parameter.
    pub fn sources<'p>(&'p self, out: &mut Vec<&'p str>) {
        match self {
            Param::Number(_) | Param::Bool(_) => {}
            Param::Text(source) => out.push(source),
            Param::Random { random } => random.iter().for_each(|p| p.sources(out)),
            Param::Conditional { conditional } => {
                out.push(&conditional.condition);
                conditional.then.sources(out);
                if let Some(otherwise) = &conditional.otherwise {
                    otherwise.sources(out);
                }
            }
        }
    }
}
