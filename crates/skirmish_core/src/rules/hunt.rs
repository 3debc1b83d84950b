//! Approach behavior.

use crate::command::Command;
use crate::context::TickContext;
use crate::math::{to_fixed, Fixed};
use crate::unit::{status, UnitState};

use super::Rule;

/// How far inside melee range a hunter stops, so rounding in the distance
/// never leaves it on the boundary.
const CLOSE_IN: Fixed = Fixed::from_bits(1 << 26);

/// Walks every unit with a `speed` metadata value toward its nearest
/// enemy until the enemy is within melee range.
///
/// Stunned, rooted, burrowed and calm units stay put; slowed units move
/// at half speed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hunt;

impl Rule for Hunt {
    fn name(&self) -> &str {
        "hunt"
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command> {
        let now = ctx.tick();
        let reach = ctx.config().melee_range;
        let mut commands = Vec::new();

        for unit in ctx.alive() {
            let Some(speed) = unit.cold.meta_number("speed").map(to_fixed) else {
                continue;
            };
            if speed <= Fixed::ZERO
                || [status::STUNNED, status::ROOTED, status::BURROWED, status::CALM]
                    .iter()
                    .any(|s| unit.status_active(s, now))
            {
                continue;
            }
            let Some(enemy) = ctx.nearest_enemy(unit, None) else {
                continue;
            };
            let distance = unit.position.distance(enemy.position);
            if distance <= reach {
                continue;
            }

            let speed = if unit.status_active(status::SLOWED, now) {
                speed / 2
            } else {
                speed
            };
            let step = speed.min(distance - reach + CLOSE_IN);
            let delta = (enemy.position - unit.position).normalize().scale(step);
            commands.push(Command::move_by(unit.id.clone(), delta).from_unit(unit.id.clone()));
            if unit.state != UnitState::Walk {
                commands.push(Command::set_state(unit.id.clone(), UnitState::Walk));
            }
        }
        commands
    }
}
