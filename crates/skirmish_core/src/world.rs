//! Mutable kernel state that commands act on.

use crate::config::SimConfig;
use crate::environment::Environment;
use crate::pool::{ParticlePool, ProjectilePool};
use crate::rng::DeterministicRng;
use crate::store::UnitStore;

/// Everything the command pipeline may mutate.
#[derive(Debug, Clone)]
pub struct World {
    /// Units.
    pub store: UnitStore,
    /// In-flight projectiles.
    pub projectiles: ProjectilePool,
    /// Cosmetic particles.
    pub particles: ParticlePool,
    /// Temperature, humidity, terrain and weather.
    pub environment: Environment,
    /// The kernel's only random source.
    pub rng: DeterministicRng,
    /// Field width and height.
    pub field: (u32, u32),
}

impl World {
    /// Allocate every store and pool at its configured capacity.
    #[must_use]
    pub fn new(config: &SimConfig) -> Self {
        Self {
            store: UnitStore::new(config.capacity),
            projectiles: ProjectilePool::new(config.projectile_capacity),
            particles: ParticlePool::new(config.particle_capacity),
            environment: Environment::new(config.field_width, config.field_height),
            rng: DeterministicRng::new(config.seed),
            field: (config.field_width, config.field_height),
        }
    }
}
