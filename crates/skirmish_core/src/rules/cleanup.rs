//! Removal of dead units.

use crate::command::Command;
use crate::context::TickContext;

use super::Rule;

/// Removes every unit whose hp reached zero or that is in the dead state.
///
/// Register last so earlier rules still see this tick's corpses in the
/// frozen snapshot (but never as alive).
#[derive(Debug, Default, Clone, Copy)]
pub struct Cleanup;

impl Rule for Cleanup {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command> {
        ctx.units()
            .iter()
            .filter(|u| !u.is_alive())
            .map(|u| Command::remove(u.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;
    use crate::rules::test_support::Harness;
    use crate::unit::{UnitSpec, UnitState};

    #[test]
    fn test_removes_dead_units_only() {
        let mut dead = UnitSpec::new("ghost", Vec2Fixed::from_ints(2, 2))
            .with_id("ghost")
            .with_hp(5);
        dead.state = UnitState::Dead;
        let mut harness = Harness::new(vec![
            UnitSpec::new("zombie", Vec2Fixed::from_ints(1, 1))
                .with_id("zombie")
                .with_hp(0),
            dead,
            UnitSpec::new("hero", Vec2Fixed::from_ints(3, 3))
                .with_id("hero")
                .with_hp(5),
        ]);
        let (commands, _) = harness.run(&mut Cleanup, 0);
        assert_eq!(commands, vec![Command::remove("zombie"), Command::remove("ghost")]);
    }
}
