//! The ability expression language.
//!
//! A small JavaScript-flavoured expression grammar used by ability
//! content for triggers, target selectors and effect parameters:
//! arithmetic, comparison, short-circuit boolean operators, property,
//! index and method access with optional chaining, and array/object
//! literals.
//!
//! Source strings are parsed once into an [`ast::Expr`] and cached by
//! source text in an [`ExpressionCache`]. A [`CompiledExpr`] is then
//! evaluated any number of times against a [`Scope`] that resolves free
//! identifiers. Identifier lookup fails soft: unknown names evaluate to
//! `undefined`.
//!
//! # Example
//!
//! ```
//! use skirmish_core::dsl::{compile, MapScope, Value};
//!
//! let expr = compile("1 + 2 * 3").unwrap();
//! assert_eq!(expr.eval(&MapScope::new()).unwrap(), Value::Number(7.0));
//! ```

pub mod ast;
mod builder;
mod cache;
mod eval;
pub mod lexer;
pub mod parser;
mod scope;
mod value;

use std::fmt;

use thiserror::Error;

pub use builder::{UnitScope, UnitScopeParams};
pub use cache::ExpressionCache;
pub use eval::evaluate;
pub use scope::{MapScope, Scope};
pub use value::{BoundMethod, Native, NativeNamespace, Value};

/// Failure to parse an expression source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset} in '{source_text}': {message}")]
pub struct ParseError {
    /// The full source text.
    pub source_text: String,
    /// Byte offset of the offending token.
    pub offset: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            source_text: source.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// Runtime failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Property read on `null`/`undefined` without `?.`.
    #[error("cannot read property '{property}' of {receiver}")]
    NullishReceiver {
        /// Property being read.
        property: String,
        /// `"null"` or `"undefined"`.
        receiver: &'static str,
    },

    /// Called something that is not callable.
    #[error("{0} is not a function")]
    NotAFunction(String),

    /// A built-in was called with unusable arguments.
    #[error("bad argument to {function}: {message}")]
    BadArgument {
        /// Built-in name.
        function: String,
        /// What is wrong.
        message: String,
    },
}

/// A parsed expression ready for repeated evaluation.
#[derive(Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    root: ast::Expr,
}

impl CompiledExpr {
    /// Source text the expression was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax tree.
    #[must_use]
    pub fn root(&self) -> &ast::Expr {
        &self.root
    }

    /// Evaluate against a scope.
    pub fn eval(&self, scope: &dyn Scope) -> Result<Value, EvalError> {
        evaluate(&self.root, scope)
    }

    /// Evaluate and coerce to a boolean.
    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, EvalError> {
        self.eval(scope).map(|v| v.truthy())
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledExpr").field(&self.source).finish()
    }
}

/// Parse `source` without caching.
pub fn compile(source: &str) -> Result<CompiledExpr, ParseError> {
    let root = parser::parse(source)?;
    Ok(CompiledExpr {
        source: source.to_string(),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Value {
        compile(source).unwrap().eval(&MapScope::new()).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("10 % 4 - -1"), Value::Number(3.0));
    }

    #[test]
    fn test_optional_chaining_on_missing_name() {
        assert_eq!(eval("a?.b.c"), Value::Undefined);
        assert_eq!(eval("a?.b.c.d(1)"), Value::Undefined);
        assert_eq!(eval("a?.[0]"), Value::Undefined);
    }

    #[test]
    fn test_optional_chaining_on_null_value() {
        let scope = MapScope::new().with("a", Value::Null);
        let expr = compile("a?.b.c").unwrap();
        assert_eq!(expr.eval(&scope).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_plain_access_on_undefined_errors() {
        let err = compile("a.b").unwrap().eval(&MapScope::new()).unwrap_err();
        assert!(matches!(err, EvalError::NullishReceiver { .. }));
    }

    #[test]
    fn test_parse_error_converts_to_sim_error() {
        let err: crate::error::SimError = compile("1 +").unwrap_err().into();
        assert!(err.to_string().contains("offset 3"));
    }
}
