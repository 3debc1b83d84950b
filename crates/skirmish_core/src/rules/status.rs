//! Timed statuses and damage over time.

use crate::command::{Command, CommandKind};
use crate::context::TickContext;
use crate::math::to_amount;
use crate::unit::{status, MetaPatch, Team};

use super::Rule;

/// Expires `<name>_until` timers and applies burning and poison damage.
///
/// When a timer runs out both the timer and the bare `<name>` flag are
/// deleted, which is also how timed buffs wear off. An expired charm
/// restores the team recorded in `charmed_from`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusEffects;

/// Damage-over-time statuses: `(status, per-tick damage key, aspect)`.
const DAMAGE_OVER_TIME: [(&str, &str, &str); 2] = [
    (status::BURNING, "burning_damage", "fire"),
    (status::POISONED, "poison_damage", "poison"),
];

impl Rule for StatusEffects {
    fn name(&self) -> &str {
        "status_effects"
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command> {
        let now = ctx.tick();
        let mut commands = Vec::new();

        for unit in ctx.alive() {
            for (name, damage_key, aspect) in DAMAGE_OVER_TIME {
                if unit.status_active(name, now) {
                    let amount = unit.cold.meta_number(damage_key).unwrap_or(1.0);
                    commands.push(
                        Command::damage(unit.id.clone(), to_amount(amount), aspect)
                            .with_id(format!("{name}:{}:{now}", unit.id)),
                    );
                }
            }

            let mut patch = MetaPatch::new();
            for (key, value) in &unit.cold.meta {
                let Some(name) = key.strip_suffix("_until") else {
                    continue;
                };
                #[allow(clippy::cast_precision_loss)]
                let expired = value.as_f64().is_some_and(|until| until <= now as f64);
                if !expired {
                    continue;
                }
                patch.insert(key.clone(), None);
                patch.insert(name.to_string(), None);
                if name == status::CHARMED {
                    let original = unit
                        .cold
                        .meta
                        .get("charmed_from")
                        .and_then(|v| v.as_str())
                        .and_then(Team::parse)
                        .unwrap_or(unit.team);
                    commands.push(
                        CommandKind::Charm {
                            unit: unit.id.clone(),
                            team: original,
                            duration: None,
                        }
                        .into(),
                    );
                }
            }
            if !patch.is_empty() {
                tracing::trace!(unit = %unit.id, expired = patch.len() / 2, "Statuses expired");
                commands.push(Command::meta(unit.id.clone(), patch));
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;
    use crate::rules::test_support::Harness;
    use crate::unit::UnitSpec;
    use serde_json::json;

    #[test]
    fn test_burning_deals_damage_until_expiry() {
        let mut harness = Harness::new(vec![UnitSpec::new("imp", Vec2Fixed::from_ints(1, 1))
            .with_id("imp")
            .with_hp(10)
            .with_meta("burning_until", json!(3))
            .with_meta("burning_damage", json!(2))]);

        let (commands, _) = harness.run(&mut StatusEffects, 1);
        assert_eq!(commands, vec![Command::damage("imp", 2, "fire").with_id("burning:imp:1")]);

        let (commands, _) = harness.run(&mut StatusEffects, 3);
        assert_eq!(commands.len(), 1);
        let CommandKind::Meta { patch, .. } = &commands[0].kind else {
            panic!("expected meta command");
        };
        assert_eq!(patch.get("burning_until"), Some(&None));
        assert_eq!(patch.get("burning"), Some(&None));
    }

    #[test]
    fn test_charm_expiry_restores_team() {
        let mut harness = Harness::new(vec![UnitSpec::new("orc", Vec2Fixed::from_ints(1, 1))
            .with_id("orc")
            .with_hp(10)
            .with_team(Team::Friendly)
            .with_meta("charmed_from", json!("hostile"))
            .with_meta("charmed_until", json!(5))]);

        let (commands, _) = harness.run(&mut StatusEffects, 4);
        assert!(commands.is_empty());

        let (commands, _) = harness.run(&mut StatusEffects, 5);
        assert!(commands.iter().any(|c| matches!(
            &c.kind,
            CommandKind::Charm { team: Team::Hostile, duration: None, .. }
        )));
    }
}
