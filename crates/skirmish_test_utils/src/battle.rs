//! Headless battle runner.
//!
//! Runs a simulation until one side is wiped out (or a tick limit is
//! reached) and summarizes the outcome, so scenario tests can assert on
//! who won and how much was left standing.

use skirmish_core::simulation::Simulation;
use skirmish_core::unit::Team;

/// Surviving strength of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideStrength {
    /// Living units.
    pub units: usize,
    /// Summed hit points of living units.
    pub hp: i64,
}

/// Living strength of `team`.
#[must_use]
pub fn strength(sim: &Simulation, team: Team) -> SideStrength {
    sim.store()
        .iter()
        .filter(|u| u.team() == team && u.is_alive())
        .fold(SideStrength::default(), |acc, u| SideStrength {
            units: acc.units + 1,
            hp: acc.hp + i64::from(u.hp()),
        })
}

/// Result of a simulated battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleResult {
    /// The winning team (None if draw/timeout).
    pub winner: Option<Team>,
    /// Simulation ticks elapsed.
    pub ticks: u64,
    /// Friendly strength at the start.
    pub start_friendly: SideStrength,
    /// Hostile strength at the start.
    pub start_hostile: SideStrength,
    /// Friendly strength at the end.
    pub end_friendly: SideStrength,
    /// Hostile strength at the end.
    pub end_hostile: SideStrength,
    /// Ticks on which the drain cap was hit.
    pub capped_ticks: u64,
}

/// Run `sim` until a side has no living units or `max_ticks` pass.
pub fn run_battle(sim: &mut Simulation, max_ticks: u64) -> BattleResult {
    let start_friendly = strength(sim, Team::Friendly);
    let start_hostile = strength(sim, Team::Hostile);
    let mut capped_ticks = 0;
    let mut ticks = 0;

    while ticks < max_ticks {
        let friendly = strength(sim, Team::Friendly);
        let hostile = strength(sim, Team::Hostile);
        if friendly.units == 0 || hostile.units == 0 {
            break;
        }
        if sim.tick().report.cap_hit {
            capped_ticks += 1;
        }
        ticks += 1;
    }

    let end_friendly = strength(sim, Team::Friendly);
    let end_hostile = strength(sim, Team::Hostile);
    let winner = match (end_friendly.units, end_hostile.units) {
        (0, 0) => None,
        (_, 0) => Some(Team::Friendly),
        (0, _) => Some(Team::Hostile),
        _ => None,
    };
    tracing::debug!(?winner, ticks, "Battle finished");

    BattleResult {
        winner,
        ticks,
        start_friendly,
        start_hostile,
        end_friendly,
        end_hostile,
        capped_ticks,
    }
}

/// Statistics for a set of battles.
#[derive(Debug, Clone, Default)]
pub struct BattleStats {
    /// Total battles run.
    pub total_battles: u32,
    /// Friendly wins.
    pub wins_friendly: u32,
    /// Hostile wins.
    pub wins_hostile: u32,
    /// Draws (timeouts or simultaneous elimination).
    pub draws: u32,
    /// Average ticks to resolution.
    pub avg_ticks: f64,
}

impl BattleStats {
    /// Add one battle.
    pub fn record(&mut self, result: &BattleResult) {
        let n = f64::from(self.total_battles);
        self.avg_ticks = (self.avg_ticks * n + result.ticks as f64) / (n + 1.0);
        self.total_battles += 1;
        match result.winner {
            Some(Team::Friendly) => self.wins_friendly += 1,
            Some(Team::Hostile) => self.wins_hostile += 1,
            _ => self.draws += 1,
        }
    }

    /// Friendly win rate (0.0 to 1.0).
    pub fn win_rate_friendly(&self) -> f64 {
        if self.total_battles == 0 {
            return 0.5;
        }
        f64::from(self.wins_friendly) / f64::from(self.total_battles)
    }

    /// Check if the matchup is balanced (within acceptable range).
    pub fn is_balanced(&self, min_rate: f64, max_rate: f64) -> bool {
        let rate = self.win_rate_friendly();
        rate >= min_rate && rate <= max_rate
    }
}

/// Run one battle per seed, building each simulation with `setup`.
pub fn run_battles<F>(seeds: &[u32], max_ticks: u64, setup: F) -> BattleStats
where
    F: Fn(u32) -> Simulation,
{
    let mut stats = BattleStats::default();
    for &seed in seeds {
        let mut sim = setup(seed);
        stats.record(&run_battle(&mut sim, max_ticks));
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{knight, orc, simulation};
    use skirmish_core::config::SimConfig;

    #[test]
    fn test_orc_beats_knight_in_a_duel() {
        let mut sim = simulation(SimConfig::default());
        sim.spawn(knight("k", 1, 1)).unwrap();
        sim.spawn(orc("o", 2, 1)).unwrap();

        let result = run_battle(&mut sim, 500);

        // Orc deals 3 per swing against the knight's 2; both swing on the
        // same ticks, so the knight falls first.
        assert_eq!(result.winner, Some(Team::Hostile));
        assert_eq!(result.end_friendly.units, 0);
        assert!(result.end_hostile.hp > 0);
        assert_eq!(result.capped_ticks, 0);
    }

    #[test]
    fn test_timeout_is_a_draw() {
        let mut sim = simulation(SimConfig::default());
        sim.spawn(knight("k", 1, 1)).unwrap();
        sim.spawn(orc("o", 30, 30)).unwrap();

        let result = run_battle(&mut sim, 20);
        assert_eq!(result.winner, None);
        assert_eq!(result.ticks, 20);
    }

    #[test]
    fn test_battle_stats_win_rate() {
        let mut stats = BattleStats::default();
        let win = BattleResult {
            winner: Some(Team::Friendly),
            ticks: 10,
            start_friendly: SideStrength::default(),
            start_hostile: SideStrength::default(),
            end_friendly: SideStrength::default(),
            end_hostile: SideStrength::default(),
            capped_ticks: 0,
        };
        let loss = BattleResult {
            winner: Some(Team::Hostile),
            ticks: 30,
            ..win.clone()
        };
        stats.record(&win);
        stats.record(&loss);

        assert!((stats.win_rate_friendly() - 0.5).abs() < 0.001);
        assert!((stats.avg_ticks - 20.0).abs() < 0.001);
        assert!(stats.is_balanced(0.45, 0.55));
    }
}
