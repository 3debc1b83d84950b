//! Ability content validation.

use std::path::Path;

use serde::Serialize;
use skirmish_core::abilities::AbilityLibrary;

use crate::error::{read, with_path, Result};

/// What a successful validation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Number of abilities.
    pub abilities: usize,
    /// Number of expression sources compiled.
    pub expressions: usize,
    /// Ability names, sorted.
    pub names: Vec<String>,
}

/// Load an ability library from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load_library(path: &Path) -> Result<AbilityLibrary> {
    let text = read(path)?;
    AbilityLibrary::from_json_str(&text).map_err(|e| with_path(e, path))
}

/// Validate ability content held in a string.
///
/// # Errors
///
/// Returns the first parse or expression error.
pub fn validate_library_str(text: &str) -> Result<ValidationReport> {
    let library = AbilityLibrary::from_json_str(text)?;
    library.validate()?;
    let names: Vec<String> = library.names().map(str::to_string).collect();
    let expressions = names
        .iter()
        .filter_map(|name| library.get(name))
        .map(|def| def.sources().len())
        .sum();
    Ok(ValidationReport {
        abilities: library.len(),
        expressions,
        names,
    })
}

/// Validate an ability library file: every definition must decode and
/// every expression must compile.
///
/// # Errors
///
/// Returns an error if any definition fails validation.
pub fn validate_library_file(path: &Path) -> Result<ValidationReport> {
    let text = read(path)?;
    let report = validate_library_str(&text).map_err(|e| match e {
        crate::error::ToolError::Sim(sim) => with_path(sim, path),
        other => other,
    })?;
    tracing::info!(
        path = %path.display(),
        abilities = report.abilities,
        expressions = report.expressions,
        "Ability library valid"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use skirmish_core::error::SimError;
    use skirmish_test_utils::fixtures::ABILITIES_JSON;

    #[test]
    fn test_fixture_library_validates() {
        let report = validate_library_str(ABILITIES_JSON).unwrap();
        assert_eq!(report.abilities, 4);
        assert_eq!(report.names, vec!["firebolt", "mend", "quake", "warcry"]);
        assert!(report.expressions >= 4);
    }

    #[test]
    fn test_bad_expression_is_reported() {
        let err = validate_library_str(
            r#"[{"name": "oops", "trigger": "self.hp >", "effects": []}]"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Sim(SimError::InvalidAbility { ref name, .. }) if name == "oops"
        ));
    }

    #[test]
    fn test_sample_library_validates() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/abilities.json");
        let report = validate_library_file(&path).unwrap();
        assert_eq!(report.abilities, 7);
        assert!(report.names.contains(&"quake".to_string()));
    }

    #[test]
    fn test_missing_file() {
        let err = validate_library_file(Path::new("/nonexistent/abilities.json")).unwrap_err();
        assert!(matches!(err, ToolError::Io { .. }));
    }
}
