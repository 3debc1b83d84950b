//! # Skirmish Core
//!
//! Deterministic tick-based combat kernel.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating point in the unit store (uses fixed-point)
//!
//! This separation enables:
//! - Headless runs and content validation
//! - Replaying a scenario to the same state hash
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`store`] / [`proxy`] - struct-of-arrays unit storage and its accessors
//! - [`context`] - the per-tick read API handed to rules
//! - [`rules`] - built-in per-tick behavior
//! - [`pipeline`] - command execution and event resolution
//! - [`dsl`] - the ability expression language
//! - [`abilities`] - data-driven abilities
//! - [`simulation`] - the tick loop
//! - [`math`] - fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod abilities;
pub mod command;
pub mod config;
pub mod context;
pub mod dsl;
pub mod environment;
pub mod error;
pub mod math;
pub mod pipeline;
pub mod pool;
pub mod proxy;
pub mod rng;
pub mod rules;
pub mod simulation;
pub mod spatial;
pub mod store;
pub mod unit;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::abilities::{AbilityDef, AbilityLibrary, Effect};
    pub use crate::command::{Command, CommandKind, Event, EventKind, EventTarget};
    pub use crate::config::{Scenario, SimConfig};
    pub use crate::context::TickContext;
    pub use crate::error::{Result, SimError};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::rules::Rule;
    pub use crate::simulation::{Simulation, TickEvents};
    pub use crate::unit::{Team, UnitId, UnitSpec, UnitState};
}
