//! Fixed-capacity pools for transient spatial entities.
//!
//! Projectiles and particles are stored struct-of-arrays like units, but
//! every field is hot and there is no side-table. Free slots are kept on
//! a free list so that the lowest freed slot is reused first.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::math::{Fixed, Vec2Fixed};
use crate::store::UnitStore;
use crate::unit::{Team, UnitId};

/// Collision radius of a unit body, in cells.
pub const UNIT_RADIUS: Fixed = Fixed::from_bits(1 << 31); // 0.5

/// Slot bookkeeping shared by both pools.
#[derive(Debug, Clone)]
struct FreeList {
    active: Vec<bool>,
    /// Free slots, highest first so `pop` yields the lowest.
    free: Vec<usize>,
}

impl FreeList {
    fn new(capacity: usize) -> Self {
        Self {
            active: vec![false; capacity],
            free: (0..capacity).rev().collect(),
        }
    }

    fn claim(&mut self) -> Option<usize> {
        let slot = self.free.pop()?;
        self.active[slot] = true;
        Some(slot)
    }

    fn release(&mut self, slot: usize) -> bool {
        if slot >= self.active.len() || !self.active[slot] {
            return false;
        }
        self.active[slot] = false;
        let pos = self.free.partition_point(|&s| s > slot);
        self.free.insert(pos, slot);
        true
    }

    fn capacity(&self) -> usize {
        self.active.len()
    }

    fn len(&self) -> usize {
        self.active.len() - self.free.len()
    }

    fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter_map(|(slot, &active)| active.then_some(slot))
    }
}

/// Parameters for launching a projectile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSpawn {
    /// Launch position.
    pub position: Vec2Fixed,
    /// Displacement per tick.
    pub velocity: Vec2Fixed,
    /// Collision radius.
    #[serde(with = "crate::math::fixed_serde")]
    pub radius: Fixed,
    /// Ticks before the projectile expires.
    pub lifetime: u32,
    /// Type tag (e.g. `"arrow"`, `"fireball"`).
    pub kind: String,
    /// Unit that fired it.
    pub source: Option<UnitId>,
    /// Team of the shooter; only enemies of this team are hit.
    pub team: Team,
    /// Damage on impact.
    pub damage: i32,
    /// Damage aspect.
    pub aspect: String,
    /// Splash radius on impact or expiry; zero for single-target.
    #[serde(with = "crate::math::fixed_serde")]
    pub explode_radius: Fixed,
}

/// A projectile that struck a unit or detonated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileImpact {
    /// Type tag of the projectile.
    pub kind: String,
    /// Shooter.
    pub source: Option<UnitId>,
    /// Shooter's team.
    pub team: Team,
    /// Unit hit, if any.
    pub target: Option<UnitId>,
    /// Impact point.
    pub position: Vec2Fixed,
    /// Damage carried.
    pub damage: i32,
    /// Damage aspect.
    pub aspect: String,
    /// Splash radius.
    pub explode_radius: Fixed,
}

/// Struct-of-arrays projectile storage.
#[derive(Debug, Clone)]
pub struct ProjectilePool {
    slots: FreeList,
    x: Vec<Fixed>,
    y: Vec<Fixed>,
    vx: Vec<Fixed>,
    vy: Vec<Fixed>,
    radius: Vec<Fixed>,
    lifetime: Vec<u32>,
    kind: Vec<String>,
    source: Vec<Option<UnitId>>,
    team: Vec<Team>,
    damage: Vec<i32>,
    aspect: Vec<String>,
    explode_radius: Vec<Fixed>,
}

impl ProjectilePool {
    /// Create a pool with room for `capacity` projectiles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: FreeList::new(capacity),
            x: vec![Fixed::ZERO; capacity],
            y: vec![Fixed::ZERO; capacity],
            vx: vec![Fixed::ZERO; capacity],
            vy: vec![Fixed::ZERO; capacity],
            radius: vec![Fixed::ZERO; capacity],
            lifetime: vec![0; capacity],
            kind: vec![String::new(); capacity],
            source: vec![None; capacity],
            team: vec![Team::Neutral; capacity],
            damage: vec![0; capacity],
            aspect: vec![String::new(); capacity],
            explode_radius: vec![Fixed::ZERO; capacity],
        }
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of live projectiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no projectile is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Launch a projectile.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::CapacityExceeded`] when the pool is full.
    pub fn spawn(&mut self, spawn: ProjectileSpawn) -> Result<usize> {
        let Some(slot) = self.slots.claim() else {
            tracing::warn!(
                capacity = self.capacity(),
                kind = %spawn.kind,
                "Projectile pool full, launch dropped"
            );
            return Err(SimError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };

        self.x[slot] = spawn.position.x;
        self.y[slot] = spawn.position.y;
        self.vx[slot] = spawn.velocity.x;
        self.vy[slot] = spawn.velocity.y;
        self.radius[slot] = spawn.radius;
        self.lifetime[slot] = spawn.lifetime;
        self.kind[slot] = spawn.kind;
        self.source[slot] = spawn.source;
        self.team[slot] = spawn.team;
        self.damage[slot] = spawn.damage;
        self.aspect[slot] = spawn.aspect;
        self.explode_radius[slot] = spawn.explode_radius;
        Ok(slot)
    }

    /// Free a slot.
    pub fn despawn(&mut self, slot: usize) -> bool {
        self.slots.release(slot)
    }

    /// Position of a live projectile.
    #[must_use]
    pub fn position(&self, slot: usize) -> Option<Vec2Fixed> {
        self.is_live(slot)
            .then(|| Vec2Fixed::new(self.x[slot], self.y[slot]))
    }

    /// Type tag of a live projectile.
    #[must_use]
    pub fn kind(&self, slot: usize) -> Option<&str> {
        self.is_live(slot).then(|| self.kind[slot].as_str())
    }

    fn is_live(&self, slot: usize) -> bool {
        slot < self.capacity() && self.slots.active[slot]
    }

    /// Live slots in ascending order.
    pub fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.active_slots()
    }

    /// Advance every projectile one tick.
    ///
    /// A projectile hits the first live enemy (in slot order) whose body
    /// overlaps it, detonates on expiry if it has a splash radius, and is
    /// dropped silently when it leaves the field.
    pub fn step(&mut self, units: &UnitStore, width: u32, height: u32) -> Vec<ProjectileImpact> {
        let mut impacts = Vec::new();
        let slots: Vec<usize> = self.slots.active_slots().collect();
        let max_x = Fixed::from_num(width);
        let max_y = Fixed::from_num(height);

        for slot in slots {
            self.x[slot] = self.x[slot].saturating_add(self.vx[slot]);
            self.y[slot] = self.y[slot].saturating_add(self.vy[slot]);
            self.lifetime[slot] = self.lifetime[slot].saturating_sub(1);
            let position = Vec2Fixed::new(self.x[slot], self.y[slot]);

            let reach = self.radius[slot] + UNIT_RADIUS;
            let reach_sq = reach.saturating_mul(reach);
            let hit = units.iter().find(|unit| {
                unit.is_alive()
                    && self.source[slot].as_deref() != Some(unit.id())
                    && (self.team[slot] == Team::Neutral || self.team[slot].is_enemy_of(unit.team()))
                    && unit.position().distance_squared(position) <= reach_sq
            });

            if let Some(unit) = hit {
                impacts.push(self.impact(slot, Some(unit.id().to_string()), position));
                self.slots.release(slot);
                continue;
            }

            let outside = position.x < Fixed::ZERO
                || position.y < Fixed::ZERO
                || position.x > max_x
                || position.y > max_y;
            if outside {
                self.slots.release(slot);
            } else if self.lifetime[slot] == 0 {
                if self.explode_radius[slot] > Fixed::ZERO {
                    impacts.push(self.impact(slot, None, position));
                }
                self.slots.release(slot);
            }
        }

        impacts
    }

    fn impact(&self, slot: usize, target: Option<UnitId>, position: Vec2Fixed) -> ProjectileImpact {
        ProjectileImpact {
            kind: self.kind[slot].clone(),
            source: self.source[slot].clone(),
            team: self.team[slot],
            target,
            position,
            damage: self.damage[slot],
            aspect: self.aspect[slot].clone(),
            explode_radius: self.explode_radius[slot],
        }
    }

    /// Hash live projectile state into `hasher`.
    pub fn hash_into<H: std::hash::Hasher>(&self, hasher: &mut H) {
        use std::hash::Hash;
        for slot in self.slots.active_slots() {
            slot.hash(hasher);
            self.x[slot].to_bits().hash(hasher);
            self.y[slot].to_bits().hash(hasher);
            self.lifetime[slot].hash(hasher);
        }
    }
}

/// Parameters for emitting a particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSpawn {
    /// Start position.
    pub position: Vec2Fixed,
    /// Displacement per tick.
    pub velocity: Vec2Fixed,
    /// Visual radius.
    #[serde(with = "crate::math::fixed_serde")]
    pub radius: Fixed,
    /// Ticks to live.
    pub lifetime: u32,
    /// Type tag (e.g. `"spark"`, `"smoke"`).
    pub kind: String,
}

/// Struct-of-arrays particle storage.
#[derive(Debug, Clone)]
pub struct ParticlePool {
    slots: FreeList,
    x: Vec<Fixed>,
    y: Vec<Fixed>,
    vx: Vec<Fixed>,
    vy: Vec<Fixed>,
    radius: Vec<Fixed>,
    lifetime: Vec<u32>,
    kind: Vec<String>,
}

impl ParticlePool {
    /// Create a pool with room for `capacity` particles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: FreeList::new(capacity),
            x: vec![Fixed::ZERO; capacity],
            y: vec![Fixed::ZERO; capacity],
            vx: vec![Fixed::ZERO; capacity],
            vy: vec![Fixed::ZERO; capacity],
            radius: vec![Fixed::ZERO; capacity],
            lifetime: vec![0; capacity],
            kind: vec![String::new(); capacity],
        }
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of live particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no particle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emit a particle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::CapacityExceeded`] when the pool is full.
    pub fn spawn(&mut self, spawn: ParticleSpawn) -> Result<usize> {
        let Some(slot) = self.slots.claim() else {
            tracing::debug!(capacity = self.capacity(), "Particle pool full");
            return Err(SimError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };

        self.x[slot] = spawn.position.x;
        self.y[slot] = spawn.position.y;
        self.vx[slot] = spawn.velocity.x;
        self.vy[slot] = spawn.velocity.y;
        self.radius[slot] = spawn.radius;
        self.lifetime[slot] = spawn.lifetime;
        self.kind[slot] = spawn.kind;
        Ok(slot)
    }

    /// Position and kind of each live particle, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec2Fixed, &str)> + '_ {
        self.slots
            .active_slots()
            .map(|slot| (Vec2Fixed::new(self.x[slot], self.y[slot]), self.kind[slot].as_str()))
    }

    /// Advance every particle one tick, expiring those out of lifetime.
    pub fn step(&mut self) {
        let slots: Vec<usize> = self.slots.active_slots().collect();
        for slot in slots {
            self.x[slot] = self.x[slot].saturating_add(self.vx[slot]);
            self.y[slot] = self.y[slot].saturating_add(self.vy[slot]);
            self.lifetime[slot] = self.lifetime[slot].saturating_sub(1);
            if self.lifetime[slot] == 0 {
                self.slots.release(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitSpec;

    fn arrow(from: Vec2Fixed, velocity: Vec2Fixed) -> ProjectileSpawn {
        ProjectileSpawn {
            position: from,
            velocity,
            radius: Fixed::from_num(0.25),
            lifetime: 10,
            kind: "arrow".into(),
            source: Some("archer".into()),
            team: Team::Friendly,
            damage: 4,
            aspect: "pierce".into(),
            explode_radius: Fixed::ZERO,
        }
    }

    #[test]
    fn test_free_list_reuses_lowest_slot() {
        let mut pool = ProjectilePool::new(3);
        let a = pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap();
        let b = pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap();
        let c = pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        assert!(pool.despawn(2));
        assert!(pool.despawn(0));
        assert_eq!(pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap(), 0);
        assert_eq!(pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap(), 2);
    }

    #[test]
    fn test_projectile_pool_capacity() {
        let mut pool = ProjectilePool::new(1);
        pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)).unwrap();
        assert!(matches!(
            pool.spawn(arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO)),
            Err(SimError::CapacityExceeded { capacity: 1 })
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_projectile_hits_enemy() {
        let mut units = UnitStore::new(4);
        units
            .add(
                UnitSpec::new("orc", Vec2Fixed::from_ints(3, 1))
                    .with_id("orc")
                    .with_team(Team::Hostile)
                    .with_hp(10),
            )
            .unwrap();

        let mut pool = ProjectilePool::new(4);
        pool.spawn(arrow(Vec2Fixed::from_ints(0, 1), Vec2Fixed::from_ints(1, 0)))
            .unwrap();

        let mut impacts = Vec::new();
        for _ in 0..5 {
            impacts.extend(pool.step(&units, 20, 20));
        }

        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].target.as_deref(), Some("orc"));
        assert_eq!(impacts[0].damage, 4);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_projectile_ignores_allies_and_expires() {
        let mut units = UnitStore::new(4);
        units
            .add(
                UnitSpec::new("knight", Vec2Fixed::from_ints(1, 0))
                    .with_team(Team::Friendly)
                    .with_hp(10),
            )
            .unwrap();

        let mut pool = ProjectilePool::new(2);
        let mut spawn = arrow(Vec2Fixed::ZERO, Vec2Fixed::ZERO);
        spawn.lifetime = 2;
        pool.spawn(spawn).unwrap();

        assert!(pool.step(&units, 20, 20).is_empty());
        assert!(pool.step(&units, 20, 20).is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_explosive_detonates_on_expiry() {
        let units = UnitStore::new(1);
        let mut pool = ProjectilePool::new(1);
        let mut spawn = arrow(Vec2Fixed::from_ints(5, 5), Vec2Fixed::ZERO);
        spawn.lifetime = 1;
        spawn.explode_radius = Fixed::from_num(2);
        pool.spawn(spawn).unwrap();

        let impacts = pool.step(&units, 20, 20);
        assert_eq!(impacts.len(), 1);
        assert!(impacts[0].target.is_none());
        assert_eq!(impacts[0].position, Vec2Fixed::from_ints(5, 5));
    }

    #[test]
    fn test_particles_expire() {
        let mut pool = ParticlePool::new(2);
        pool.spawn(ParticleSpawn {
            position: Vec2Fixed::ZERO,
            velocity: Vec2Fixed::from_ints(1, 0),
            radius: Fixed::from_num(1),
            lifetime: 2,
            kind: "spark".into(),
        })
        .unwrap();

        pool.step();
        assert_eq!(pool.iter().next().unwrap().0, Vec2Fixed::from_ints(1, 0));
        pool.step();
        assert!(pool.is_empty());
    }
}
