//! Compile-once cache keyed by source text.

use std::collections::HashMap;
use std::rc::Rc;

use super::{compile, CompiledExpr, ParseError};

/// Maps each distinct source string to exactly one compiled expression.
///
/// Parse failures are cached too, so a broken expression in ability
/// content is parsed (and reported) once rather than every tick.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: HashMap<String, Result<Rc<CompiledExpr>, ParseError>>,
    hits: u64,
    misses: u64,
}

impl ExpressionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source`, or return the cached result.
    pub fn compile(&mut self, source: &str) -> Result<Rc<CompiledExpr>, ParseError> {
        if let Some(entry) = self.entries.get(source) {
            self.hits += 1;
            return entry.clone();
        }
        self.misses += 1;
        let entry = compile(source).map(Rc::new);
        if let Err(err) = &entry {
            tracing::debug!(source, offset = err.offset, message = %err.message, "Expression failed to parse");
        }
        self.entries.insert(source.to_string(), entry.clone());
        entry
    }

    /// Number of distinct sources seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been compiled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` counters.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_source_yields_same_instance() {
        let mut cache = ExpressionCache::new();
        let a = cache.compile("self.hp < 5").unwrap();
        let b = cache.compile("self.hp < 5").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_parse_failures_are_cached() {
        let mut cache = ExpressionCache::new();
        assert!(cache.compile("1 +").is_err());
        assert!(cache.compile("1 +").is_err());
        assert_eq!(cache.stats(), (1, 1));
    }
}
