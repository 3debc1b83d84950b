//! Kernel configuration and scenario descriptions.
//!
//! Both are plain data deserialized from RON. This module performs no
//! IO; callers read files and hand the text over.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{fixed_serde, Fixed};
use crate::unit::UnitSpec;

/// Default cap on drain passes per tick.
pub const DEFAULT_MAX_DRAIN_ITERATIONS: usize = 10;

/// Construction-time parameters of a [`Simulation`](crate::simulation::Simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Unit store capacity.
    pub capacity: usize,
    /// Projectile pool capacity.
    pub projectile_capacity: usize,
    /// Particle pool capacity.
    pub particle_capacity: usize,
    /// Field width in cells.
    pub field_width: u32,
    /// Field height in cells.
    pub field_height: u32,
    /// RNG seed.
    pub seed: u32,
    /// Drain passes before the pipeline gives up on a tick.
    pub max_drain_iterations: usize,
    /// Spatial grid cell size.
    pub cell_size: u32,
    /// Reach of the melee rule.
    #[serde(with = "fixed_serde")]
    pub melee_range: Fixed,
    /// Ticks between melee swings.
    pub melee_cooldown: u64,
    /// Units closer than this are pushed apart after the drain.
    #[serde(with = "fixed_serde")]
    pub separation_radius: Fixed,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            projectile_capacity: 256,
            particle_capacity: 512,
            field_width: 64,
            field_height: 64,
            seed: 12345,
            max_drain_iterations: DEFAULT_MAX_DRAIN_ITERATIONS,
            cell_size: 4,
            melee_range: Fixed::from_num(1.5),
            melee_cooldown: 10,
            separation_radius: Fixed::from_num(0.8),
        }
    }
}

impl SimConfig {
    /// Parse from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).map_err(|e| SimError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the kernel cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SimError::InvalidState("capacity must be positive".into()));
        }
        if self.field_width == 0 || self.field_height == 0 {
            return Err(SimError::InvalidState("field dimensions must be positive".into()));
        }
        if self.max_drain_iterations == 0 {
            return Err(SimError::InvalidState(
                "max_drain_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A runnable setup: configuration, initial units and ability content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Kernel configuration.
    #[serde(default)]
    pub config: SimConfig,
    /// Units spawned before the first tick.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
    /// Path of the JSON ability library, relative to the scenario file.
    #[serde(default)]
    pub abilities: Option<String>,
    /// Ticks to run when none are given on the command line.
    #[serde(default = "default_ticks")]
    pub ticks: u64,
}

fn default_ticks() -> u64 {
    100
}

impl Scenario {
    /// Parse from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let scenario: Self = ron::from_str(text).map_err(|e| SimError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        scenario.config.validate()?;
        Ok(scenario)
    }
}
