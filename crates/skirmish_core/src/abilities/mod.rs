//! Data-driven abilities.
//!
//! Abilities are loaded from JSON content into an [`AbilityLibrary`]. Each
//! definition has a cooldown, an optional use limit, an optional trigger
//! expression, a target selector and a list of typed effects whose
//! parameters may be literals, expressions or `$random`/`$conditional`
//! directives.
//!
//! ```json
//! {
//!   "name": "firebolt",
//!   "cooldown": 30,
//!   "trigger": "distance(target) < 8",
//!   "effects": [
//!     {"type": "projectile", "damage": "self.damage * 2", "speed": 1.5, "aspect": "fire"}
//!   ]
//! }
//! ```
//!
//! The [`Abilities`] rule evaluates every unit's abilities once per tick
//! and turns fired effects into commands and events.

mod definition;
mod library;
mod params;
mod runtime;

pub use definition::{AbilityDef, Effect, ProjectileEffect, StatusPatch, TargetSpec, UnitTemplate};
pub use library::AbilityLibrary;
pub use params::{Conditional, Param};
pub use runtime::{is_ready, Abilities};
