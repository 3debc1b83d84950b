//! # Skirmish Development Tools
//!
//! Command-line tools for content authors:
//! - Ability library validation
//! - Headless scenario runs with a JSON or text summary
//!
//! All file IO of the workspace lives here; the kernel only ever sees
//! strings.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod run;
pub mod validate;
