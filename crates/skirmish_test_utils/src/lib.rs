//! # Skirmish Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism test harness
//! - Fixture units, scenarios and ability content
//! - Headless battle runner
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod battle;
pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
