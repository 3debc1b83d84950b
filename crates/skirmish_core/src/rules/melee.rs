//! Pairwise melee combat.

use crate::command::Command;
use crate::context::TickContext;
use crate::math::to_amount;
use crate::unit::{status, UnitSnapshot, UnitState};

use super::Rule;

/// Cooldown key used for melee swings.
pub const MELEE: &str = "melee";

/// Every unit with positive damage swings at its nearest enemy within
/// melee range.
///
/// All decisions are taken against the frozen snapshot and the damage is
/// only applied when the pipeline drains, so two adjacent enemies that
/// are both off cooldown hit each other in the same tick. Ties between
/// equally near targets go to the lower slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeleeCombat;

fn can_swing(unit: &UnitSnapshot, now: u64, cooldown: u64) -> bool {
    if unit.damage <= 0 {
        return false;
    }
    if [status::STUNNED, status::BURROWED, status::AIRBORNE, status::CALM]
        .iter()
        .any(|s| unit.status_active(s, now))
    {
        return false;
    }
    unit.cold
        .last_used
        .get(MELEE)
        .map_or(true, |&last| now.saturating_sub(last) >= cooldown)
}

fn can_be_hit(unit: &UnitSnapshot, now: u64) -> bool {
    !unit.status_active(status::BURROWED, now) && !unit.status_active(status::AIRBORNE, now)
}

impl Rule for MeleeCombat {
    fn name(&self) -> &str {
        "melee_combat"
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command> {
        let now = ctx.tick();
        let range = ctx.config().melee_range;
        let cooldown = ctx.config().melee_cooldown;
        let mut commands = Vec::new();

        for unit in ctx.alive() {
            if !can_swing(unit, now, cooldown) {
                continue;
            }
            let target = ctx
                .in_radius(unit.position, range)
                .into_iter()
                .filter(|other| unit.team.is_enemy_of(other.team) && can_be_hit(other, now))
                .min_by_key(|other| (other.position.distance_squared(unit.position), other.slot));
            let Some(target) = target else {
                continue;
            };

            let bonus = unit
                .cold
                .meta_number("damage_bonus")
                .map_or(0, to_amount);
            tracing::trace!(attacker = %unit.id, target = %target.id, "Melee swing");
            commands.push(
                Command::damage(target.id.clone(), unit.damage.saturating_add(bonus), "physical")
                    .from_unit(unit.id.clone())
                    .with_id(format!("{MELEE}:{}:{now}", unit.id)),
            );
            commands.push(Command::ability_used(unit.id.clone(), MELEE));
            if unit.state != UnitState::Attack {
                commands.push(Command::set_state(unit.id.clone(), UnitState::Attack));
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::math::Vec2Fixed;
    use crate::rules::test_support::Harness;
    use crate::unit::{Team, UnitSpec};

    fn duel() -> Harness {
        Harness::new(vec![
            UnitSpec::new("knight", Vec2Fixed::from_ints(5, 5))
                .with_id("knight")
                .with_hp(10)
                .with_damage(3)
                .with_team(Team::Friendly),
            UnitSpec::new("orc", Vec2Fixed::from_ints(6, 5))
                .with_id("orc")
                .with_hp(10)
                .with_damage(2)
                .with_team(Team::Hostile),
        ])
    }

    fn damage_targets(commands: &[Command]) -> Vec<(&str, i32)> {
        commands
            .iter()
            .filter_map(|c| match &c.kind {
                CommandKind::Damage { target, amount, .. } => Some((target.as_str(), *amount)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_mutual_attack_is_symmetric() {
        let mut harness = duel();
        let (commands, _) = harness.run(&mut MeleeCombat, 0);
        assert_eq!(damage_targets(&commands), vec![("orc", 3), ("knight", 2)]);
    }

    #[test]
    fn test_cooldown_blocks_second_swing() {
        let mut harness = duel();
        harness
            .world
            .store
            .get_mut("knight")
            .unwrap()
            .mark_ability_used(MELEE, 0);
        harness.refresh();

        let (commands, _) = harness.run(&mut MeleeCombat, 5);
        assert_eq!(damage_targets(&commands), vec![("knight", 2)]);

        let (commands, _) = harness.run(&mut MeleeCombat, 10);
        assert_eq!(damage_targets(&commands).len(), 2);
    }

    #[test]
    fn test_out_of_range_does_nothing() {
        let mut harness = duel();
        harness
            .world
            .store
            .get_mut("orc")
            .unwrap()
            .set_position(Vec2Fixed::from_ints(9, 5));
        harness.refresh();
        let (commands, _) = harness.run(&mut MeleeCombat, 0);
        assert!(commands.is_empty());
    }
}
