//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Combat runs must be 100% reproducible from a seed. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: the unit store keeps positions and mass in
//!   [`skirmish_core::math::Fixed`]; expression values are converted with
//!   saturating conversions at the boundary.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Units are always visited in slot order and metadata is a `BTreeMap`.
//!
//! - **System randomness**: every draw goes through the seeded
//!   [`skirmish_core::rng::DeterministicRng`].
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual rules and resolvers
//! 2. **Property tests**: random inputs must still produce deterministic outputs
//! 3. **Integration tests**: full scenarios are reproducible
//! 4. **Parallel tests**: running N simulations on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::thread;

use skirmish_core::simulation::Simulation;
use skirmish_core::unit::{UnitId, UnitSnapshot};

/// Final hashes from several runs of the same setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// One hash per run, in run order.
    pub hashes: Vec<u64>,
    /// Ticks each run advanced.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Whether every run ended in the same state.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Distinct hashes, sorted.
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// # Panics
    ///
    /// Panics with the hash spread if the runs disagree.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic(),
            "{} runs of {} ticks ended in {} distinct states: {:?}",
            self.hashes.len(),
            self.ticks,
            self.unique_hashes().len(),
            self.hashes
        );
    }
}

/// Where two runs first disagreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// First tick after which the state hashes differed; 0 means the
    /// setups already differed.
    pub tick: u64,
    /// Units present in only one run or with different state, sorted.
    pub units: Vec<UnitId>,
}

/// Run a setup several times and compare the final hashes.
///
/// Generic over the state so the harness itself can be checked with
/// trivial state.
///
/// # Example
///
/// ```
/// use skirmish_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(3, 10, || 0u64, |n| *n += 1, |n| *n);
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S>(
    runs: usize,
    ticks: u64,
    setup: impl Fn() -> S,
    step: impl Fn(&mut S),
    hash: impl Fn(&S) -> u64,
) -> DeterminismResult {
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            for _ in 0..ticks {
                step(&mut state);
            }
            hash(&state)
        })
        .collect();
    DeterminismResult { hashes, ticks }
}

/// Run two simulations from `setup_fn` for `num_ticks` and compare their
/// final [`Simulation::state_hash`].
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |sim| {
            sim.tick();
        },
        Simulation::state_hash,
    )
    .is_deterministic()
}

/// Run `num_sims` simulations on scoped threads and collect their final
/// hashes.
///
/// Each thread builds its own simulation, so nothing crosses a thread
/// boundary but the setup function and the hash.
///
/// # Panics
///
/// Panics if a simulation thread panics.
pub fn run_parallel_simulations_scoped<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    sim.run(num_ticks);
                    sim.state_hash()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });
    DeterminismResult {
        hashes,
        ticks: num_ticks,
    }
}

fn snapshots(sim: &Simulation) -> BTreeMap<UnitId, UnitSnapshot> {
    sim.store()
        .snapshot()
        .into_iter()
        .map(|unit| (unit.id.clone(), unit))
        .collect()
}

/// Ids of units that differ between two simulations.
#[must_use]
pub fn diverging_units(a: &Simulation, b: &Simulation) -> Vec<UnitId> {
    let left = snapshots(a);
    let right = snapshots(b);
    let mut ids: Vec<UnitId> = left
        .iter()
        .filter(|(id, unit)| right.get(*id) != Some(*unit))
        .map(|(id, _)| id.clone())
        .chain(right.keys().filter(|id| !left.contains_key(*id)).cloned())
        .collect();
    ids.sort();
    ids
}

/// Step two simulations in lockstep and report the first tick after
/// which they disagree, or `None` if they stay equal for `num_ticks`.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<Divergence>
where
    F: Fn() -> Simulation,
{
    let mut a = setup_fn();
    let mut b = setup_fn();

    for tick in 0..=num_ticks {
        if tick > 0 {
            a.tick();
            b.tick();
        }
        if a.state_hash() != b.state_hash() {
            return Some(Divergence {
                tick,
                units: diverging_units(&a, &b),
            });
        }
    }
    None
}

/// Hash any hashable value with the std hasher.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing of the kernel.
pub mod strategies {
    use proptest::prelude::*;
    use skirmish_core::command::Command;
    use skirmish_core::math::{Fixed, Vec2Fixed};
    use skirmish_core::unit::{Team, UnitSpec};

    /// Generate a fixed-point coordinate inside a 64-cell field.
    pub fn arb_fixed_coord() -> impl Strategy<Value = Fixed> {
        (0i32..64 * 16).prop_map(|n| Fixed::from_num(n) / 16)
    }

    /// Generate a position inside a 64x64 field.
    pub fn arb_vec2_position() -> impl Strategy<Value = Vec2Fixed> {
        (arb_fixed_coord(), arb_fixed_coord()).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// Generate a team.
    pub fn arb_team() -> impl Strategy<Value = Team> {
        prop_oneof![Just(Team::Neutral), Just(Team::Friendly), Just(Team::Hostile)]
    }

    /// Generate health values (1-100).
    pub fn arb_health() -> impl Strategy<Value = i32> {
        1i32..100
    }

    /// Generate damage values (0-10).
    pub fn arb_damage() -> impl Strategy<Value = i32> {
        0i32..10
    }

    /// Generate a unit without an explicit id.
    pub fn arb_unit_spec() -> impl Strategy<Value = UnitSpec> {
        (arb_vec2_position(), arb_health(), arb_damage(), arb_team()).prop_map(
            |(position, hp, damage, team)| {
                UnitSpec::new("grunt", position)
                    .with_hp(hp)
                    .with_damage(damage)
                    .with_team(team)
            },
        )
    }

    /// Generate a list of unit specs.
    pub fn arb_unit_list(max_units: usize) -> impl Strategy<Value = Vec<UnitSpec>> {
        proptest::collection::vec(arb_unit_spec(), 1..max_units)
    }

    /// Generate a store operation: `Some(spec)` adds, `None` removes the
    /// oldest unit.
    pub fn arb_store_ops(max_len: usize) -> impl Strategy<Value = Vec<Option<UnitSpec>>> {
        proptest::collection::vec(proptest::option::weighted(0.7, arb_unit_spec()), 0..max_len)
    }

    /// Generate a damage command against one of `ids`.
    pub fn arb_damage_command(ids: Vec<String>) -> impl Strategy<Value = Command> {
        (proptest::sample::select(ids), 1i32..20)
            .prop_map(|(id, amount)| Command::damage(id, amount, "physical"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{knight, orc, simulation, skirmish};
    use proptest::prelude::*;
    use skirmish_core::config::SimConfig;

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic());
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_simulation_determinism() {
        assert!(verify_simulation_determinism(
            || simulation(SimConfig::default()),
            100
        ));
    }

    #[test]
    fn test_duel_determinism() {
        let is_det = verify_simulation_determinism(
            || {
                let mut sim = simulation(SimConfig::default());
                sim.spawn(knight("k", 1, 1)).unwrap();
                sim.spawn(orc("o", 2, 1)).unwrap();
                sim
            },
            200,
        );
        assert!(is_det);
    }

    #[test]
    fn test_find_divergence_on_deterministic_sim() {
        let divergence = find_first_divergence(|| skirmish(8, 7), 150);
        assert!(divergence.is_none(), "Expected no divergence");
    }

    #[test]
    fn test_divergence_names_units() {
        let mut a = skirmish(4, 3);
        let b = skirmish(4, 3);
        assert!(diverging_units(&a, &b).is_empty());

        a.despawn("k1").unwrap();
        a.enqueue(skirmish_core::command::Command::damage("o2", 1, "physical"));
        a.drain();
        assert_eq!(diverging_units(&a, &b), vec!["k1".to_string(), "o2".to_string()]);
    }

    #[test]
    fn test_parallel_skirmish_matches() {
        let result = run_parallel_simulations_scoped(|| skirmish(12, 99), 4, 200);
        result.assert_deterministic();
    }

    #[test]
    fn test_different_seeds_diverge() {
        let a = {
            let mut sim = skirmish(12, 1);
            sim.run(300);
            sim.state_hash()
        };
        let b = {
            let mut sim = skirmish(12, 2);
            sim.run(300);
            sim.state_hash()
        };
        assert_ne!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_random_armies_are_deterministic(
            units in strategies::arb_unit_list(24),
            seed in any::<u32>(),
        ) {
            let setup = || {
                let mut sim = simulation(SimConfig { seed, ..SimConfig::default() });
                for spec in &units {
                    sim.spawn(spec.clone().with_meta("speed", 0.5.into())).unwrap();
                }
                sim
            };
            prop_assert!(verify_simulation_determinism(setup, 60));
        }
    }
}
