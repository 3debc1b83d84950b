//! Headless scenario runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use skirmish_core::abilities::AbilityLibrary;
use skirmish_core::config::Scenario;
use skirmish_core::simulation::Simulation;

use crate::error::{read, with_path, Result, ToolError};
use crate::validate::load_library;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Ticks run.
    pub ticks: u64,
    /// Final state hash.
    pub state_hash: u64,
    /// Living units per team.
    pub alive: BTreeMap<String, usize>,
    /// Total damage applied.
    pub damage_dealt: i64,
    /// Units spawned during the run.
    pub spawned: usize,
    /// Units removed during the run.
    pub removed: usize,
    /// Uses per ability.
    pub abilities_used: BTreeMap<String, usize>,
    /// Projectile impacts.
    pub impacts: usize,
    /// Ticks on which the drain cap was hit.
    pub capped_ticks: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario     {}", self.scenario)?;
        writeln!(f, "ticks        {}", self.ticks)?;
        writeln!(f, "state hash   {:016x}", self.state_hash)?;
        for (team, count) in &self.alive {
            writeln!(f, "alive        {team}: {count}")?;
        }
        writeln!(f, "damage       {}", self.damage_dealt)?;
        writeln!(f, "spawned      {}", self.spawned)?;
        writeln!(f, "removed      {}", self.removed)?;
        for (ability, count) in &self.abilities_used {
            writeln!(f, "ability      {ability}: {count}")?;
        }
        writeln!(f, "impacts      {}", self.impacts)?;
        write!(f, "capped ticks {}", self.capped_ticks)
    }
}

impl RunSummary {
    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ToolError::Serialize(e.to_string()))
    }

    /// Pretty RON rendering, matching the scenario file format.
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ToolError::Serialize(e.to_string()))
    }
}

/// Load a scenario file and the ability library it points at.
///
/// The library path is resolved relative to the scenario file. A scenario
/// without one runs with an empty library.
///
/// # Errors
///
/// Returns an error if either file cannot be read or parsed.
pub fn load_scenario(path: &Path) -> Result<(Scenario, AbilityLibrary)> {
    let text = read(path)?;
    let scenario = Scenario::from_ron_str(&text).map_err(|e| with_path(e, path))?;
    let library = match &scenario.abilities {
        Some(relative) => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            load_library(&base.join(relative))?
        }
        None => AbilityLibrary::new(),
    };
    Ok((scenario, library))
}

/// Run a loaded scenario for `ticks` ticks (the scenario's own count when
/// `None`).
///
/// # Errors
///
/// Returns an error if the scenario references unknown abilities, the
/// library has a broken expression, or a unit cannot be spawned.
pub fn run_scenario(scenario: &Scenario, library: AbilityLibrary, ticks: Option<u64>) -> Result<RunSummary> {
    let ticks = ticks.unwrap_or(scenario.ticks);
    let mut sim = Simulation::from_scenario(scenario, library)?;

    let mut damage_dealt = 0i64;
    let mut spawned = 0;
    let mut removed = 0;
    let mut impacts = 0;
    let mut capped_ticks = 0;
    let mut abilities_used: BTreeMap<String, usize> = BTreeMap::new();

    for _ in 0..ticks {
        let events = sim.tick();
        let report = events.report;
        damage_dealt += report.damage.iter().map(|d| i64::from(d.amount)).sum::<i64>();
        spawned += report.spawned.len();
        removed += report.removed.len();
        impacts += events.impacts;
        if report.cap_hit {
            capped_ticks += 1;
        }
        for (_, ability) in report.abilities_used {
            *abilities_used.entry(ability).or_insert(0) += 1;
        }
    }

    let mut alive = BTreeMap::new();
    for unit in sim.store().iter().filter(|u| u.is_alive()) {
        *alive.entry(unit.team().as_str().to_string()).or_insert(0) += 1;
    }

    tracing::info!(
        scenario = %scenario.name,
        ticks,
        state_hash = sim.state_hash(),
        "Run finished"
    );

    Ok(RunSummary {
        scenario: scenario.name.clone(),
        ticks,
        state_hash: sim.state_hash(),
        alive,
        damage_dealt,
        spawned,
        removed,
        abilities_used,
        impacts,
        capped_ticks,
    })
}

/// Load and run a scenario file.
///
/// # Errors
///
/// As [`load_scenario`] and [`run_scenario`].
pub fn run_scenario_file(path: &Path, ticks: Option<u64>) -> Result<RunSummary> {
    let (scenario, library) = load_scenario(path)?;
    run_scenario(&scenario, library, ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_core::error::SimError;
    use skirmish_test_utils::fixtures::ability_library;

    const DUEL: &str = r#"(
        name: "duel",
        units: [
            (id: Some("k"), sprite: "knight", position: (x: 1.0, y: 1.0), hp: 10, damage: 2, team: friendly),
            (id: Some("o"), sprite: "orc", position: (x: 2.0, y: 1.0), hp: 10, damage: 3, team: hostile,
             abilities: ["quake"]),
        ],
        ticks: 50,
    )"#;

    #[test]
    fn test_duel_summary() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let summary = run_scenario(&scenario, ability_library(), None).unwrap();
        assert_eq!(summary.ticks, 50);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.alive.get("hostile"), Some(&1));
        assert!(summary.alive.get("friendly").is_none());
        assert!(summary.damage_dealt >= 10);
        assert_eq!(summary.capped_ticks, 0);
    }

    #[test]
    fn test_summary_renderings() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let summary = run_scenario(&scenario, ability_library(), Some(5)).unwrap();

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["scenario"], "duel");
        assert_eq!(json["ticks"], 5);

        let ron = summary.to_ron().unwrap();
        assert!(ron.contains("scenario: \"duel\""));
    }

    #[test]
    fn test_runs_are_reproducible() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let a = run_scenario(&scenario, ability_library(), Some(30)).unwrap();
        let b = run_scenario(&scenario, ability_library(), Some(30)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_scenario_runs() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/scenario.ron");
        let summary = run_scenario_file(&path, Some(60)).unwrap();
        assert_eq!(summary.scenario, "river_crossing");
        assert_eq!(summary.ticks, 60);
        assert!(summary.alive.values().sum::<usize>() + summary.removed <= 10 + summary.spawned);
    }

    #[test]
    fn test_unknown_ability_rejected() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let err = run_scenario(&scenario, AbilityLibrary::new(), None).unwrap_err();
        assert!(matches!(err, ToolError::Sim(SimError::UnknownAbility(ref name)) if name == "quake"));
    }
}
