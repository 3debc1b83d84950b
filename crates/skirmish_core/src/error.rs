//! Error types for the combat kernel.

use thiserror::Error;

use crate::dsl::{EvalError, ParseError};

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error type for all kernel errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// A fixed-capacity store or pool is full.
    #[error("Capacity exceeded: all {capacity} slots are in use")]
    CapacityExceeded {
        /// Configured capacity of the store or pool.
        capacity: usize,
    },

    /// A unit with this id is already active.
    #[error("Duplicate unit ID: {0}")]
    DuplicateUnitId(String),

    /// No active unit carries this id.
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// Slot index outside the store.
    #[error("Slot out of range: {0}")]
    SlotOutOfRange(usize),

    /// Expression source failed to parse.
    #[error("Failed to parse expression '{source_text}' at offset {offset}: {message}")]
    Parse {
        /// The expression source.
        source_text: String,
        /// Byte offset of the failure.
        offset: usize,
        /// Error message.
        message: String,
    },

    /// Expression evaluation failed.
    #[error("Expression evaluation failed: {0}")]
    Eval(String),

    /// Ability content is malformed.
    #[error("Invalid ability '{name}': {message}")]
    InvalidAbility {
        /// Ability name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A unit references an ability that is not in the library.
    #[error("Unknown ability: {0}")]
    UnknownAbility(String),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid kernel state.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),
}

impl From<ParseError> for SimError {
    fn from(err: ParseError) -> Self {
        SimError::Parse {
            source_text: err.source_text,
            offset: err.offset,
            message: err.message,
        }
    }
}

impl From<EvalError> for SimError {
    fn from(err: EvalError) -> Self {
        SimError::Eval(err.to_string())
    }
}
