//! Named collection of ability definitions.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use super::definition::AbilityDef;
use crate::dsl::compile;
use crate::error::{Result, SimError};
use crate::unit::UnitSpec;

/// Ability definitions keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbilityLibrary {
    abilities: BTreeMap<String, AbilityDef>,
}

impl AbilityLibrary {
    /// Empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document: either an array of definitions or an object
    /// with an `abilities` array.
    ///
    /// Each definition is decoded on its own so an error names the
    /// offending ability.
    ///
    /// # Errors
    ///
    /// [`SimError::DataParseError`] for malformed JSON,
    /// [`SimError::InvalidAbility`] for a bad or duplicated definition.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: Json = serde_json::from_str(text).map_err(|e| SimError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        let entries = match document {
            Json::Array(entries) => entries,
            Json::Object(mut map) => match map.remove("abilities") {
                Some(Json::Array(entries)) => entries,
                _ => {
                    return Err(SimError::DataParseError {
                        path: "<inline>".to_string(),
                        message: "expected an `abilities` array".to_string(),
                    })
                }
            },
            _ => {
                return Err(SimError::DataParseError {
                    path: "<inline>".to_string(),
                    message: "expected an array of abilities".to_string(),
                })
            }
        };

        let mut library = Self::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let name = entry
                .get("name")
                .and_then(Json::as_str)
                .map_or_else(|| format!("#{index}"), str::to_string);
            let def: AbilityDef = serde_json::from_value(entry).map_err(|e| SimError::InvalidAbility {
                name: name.clone(),
                message: e.to_string(),
            })?;
            library.insert(def)?;
        }
        tracing::debug!(count = library.len(), "Loaded ability library");
        Ok(library)
    }

    /// Add a definition.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidAbility`] if the name is taken.
    pub fn insert(&mut self, def: AbilityDef) -> Result<()> {
        if self.abilities.contains_key(&def.name) {
            return Err(SimError::InvalidAbility {
                name: def.name,
                message: "defined more than once".to_string(),
            });
        }
        self.abilities.insert(def.name.clone(), def);
        Ok(())
    }

    /// Look up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AbilityDef> {
        self.abilities.get(name)
    }

    /// Whether `name` is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.abilities.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.abilities.keys().map(String::as_str)
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    /// Whether the library is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }

    /// Compile every trigger, target and expression parameter.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidAbility`] naming the first ability with an
    /// expression that does not parse.
    pub fn validate(&self) -> Result<()> {
        for def in self.abilities.values() {
            for source in def.sources() {
                compile(source).map_err(|e| SimError::InvalidAbility {
                    name: def.name.clone(),
                    message: format!("`{source}` at offset {}: {}", e.offset, e.message),
                })?;
            }
        }
        Ok(())
    }

    /// Check that every ability a unit lists is defined.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownAbility`] with the first missing name.
    pub fn check_units<'s>(&self, specs: impl IntoIterator<Item = &'s UnitSpec>) -> Result<()> {
        for spec in specs {
            if let Some(missing) = spec.abilities.iter().find(|a| !self.contains(a)) {
                return Err(SimError::UnknownAbility(missing.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;

    const CONTENT: &str = r#"[
        {"name": "slash", "cooldown": 5, "effects": [{"type": "damage", "amount": 3}]},
        {"name": "mend", "cooldown": 20, "target": "self", "trigger": "self.hp < self.maxHp",
         "effects": [{"type": "heal", "amount": "self.maxHp * 0.25"}]}
    ]"#;

    #[test]
    fn test_load_and_validate() {
        let library = AbilityLibrary::from_json_str(CONTENT).unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["mend", "slash"]);
        assert!(library.validate().is_ok());
    }

    #[test]
    fn test_wrapped_document() {
        let text = format!(r#"{{"abilities": {CONTENT}}}"#);
        assert_eq!(AbilityLibrary::from_json_str(&text).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_effect_names_the_ability() {
        let err = AbilityLibrary::from_json_str(
            r#"[{"name": "boom", "effects": [{"type": "explode"}]}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::InvalidAbility { ref name, .. } if name == "boom"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = AbilityLibrary::from_json_str(
            r#"[{"name": "a", "effects": []}, {"name": "a", "effects": []}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::InvalidAbility { .. }));
    }

    #[test]
    fn test_validate_reports_bad_expression() {
        let library = AbilityLibrary::from_json_str(
            r#"[{"name": "broken", "trigger": "self.hp <", "effects": []}]"#,
        )
        .unwrap();
        let err = library.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_check_units() {
        let library = AbilityLibrary::from_json_str(CONTENT).unwrap();
        let ok = UnitSpec::new("knight", Vec2Fixed::ZERO).with_ability("slash");
        let bad = UnitSpec::new("mage", Vec2Fixed::ZERO).with_ability("fireball");
        assert!(library.check_units([&ok]).is_ok());
        assert!(matches!(
            library.check_units([&ok, &bad]),
            Err(SimError::UnknownAbility(name)) if name == "fireball"
        ));
    }
}
