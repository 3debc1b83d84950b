//! Seeded linear-congruential random source.
//!
//! Every random draw in the kernel goes through one [`DeterministicRng`]
//! owned by the [`Simulation`](crate::simulation::Simulation) and lent to
//! rules through the tick context. There is no global generator.

use serde::{Deserialize, Serialize};

const MULTIPLIER: u32 = 1_664_525;
const INCREMENT: u32 = 1_013_904_223;
const MODULUS: f64 = 4_294_967_296.0;

/// Linear-congruential generator over `u32` state.
///
/// `state = state * 1664525 + 1013904223 (mod 2^32)`, draws are
/// `state / 2^32`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u32,
}

impl DeterministicRng {
    /// Create a generator from a seed.
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Current internal state, for hashing and diagnostics.
    #[must_use]
    pub const fn state(&self) -> u32 {
        self.state
    }

    /// Advance the recurrence and return the raw state.
    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT);
        self.state
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / MODULUS
    }

    /// Uniform draw in `[min, max)`.
    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Uniform integer in `[min, max]` (inclusive).
    pub fn range_int(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let (lo, hi) = (i128::from(min), i128::from(max));
        let span = (hi - lo + 1) as f64;
        let offset = (self.next_f64() * span).floor() as i128;
        (lo + offset).clamp(lo, hi) as i64
    }

    /// Returns `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick an index into a collection of `len` items.
    pub fn pick_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let idx = (self.next_f64() * len as f64).floor() as usize;
        Some(idx.min(len - 1))
    }

    /// Pick an element from a slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        self.pick_index(items.len()).map(|idx| &items[idx])
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(12345)
    }
}
