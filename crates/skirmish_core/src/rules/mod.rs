//! Rules: the per-tick behavior of the kernel.
//!
//! A rule reads the frozen state through a [`TickContext`] and answers
//! with commands. Rules run in registration order, and that order is
//! significant: [`Cleanup`] is expected to be last.

mod cleanup;
mod hunt;
mod melee;
mod status;

pub use cleanup::Cleanup;
pub use hunt::Hunt;
pub use melee::MeleeCombat;
pub use status::StatusEffects;

use crate::command::Command;
use crate::context::TickContext;

/// One step of per-tick behavior.
pub trait Rule {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produce commands for this tick. Further commands and events may be
    /// queued on the context.
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Vec<Command>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;

    use crate::config::SimConfig;
    use crate::context::{FrozenUnits, TickContext};
    use crate::spatial::SpatialGrid;
    use crate::unit::UnitSpec;
    use crate::world::World;

    use super::Rule;
    use crate::command::{Command, Event};

    /// A world with units plus the per-tick indexes rules need.
    pub struct Harness {
        pub world: World,
        pub frozen: FrozenUnits,
        pub grid: SpatialGrid,
        pub config: SimConfig,
    }

    impl Harness {
        pub fn new(units: Vec<UnitSpec>) -> Self {
            let config = SimConfig::default();
            let mut world = World::new(&config);
            for spec in units {
                world.store.add(spec).unwrap();
            }
            let grid = SpatialGrid::new(
                config.field_width,
                config.field_height,
                config.cell_size,
                config.capacity,
            );
            let mut harness = Self {
                world,
                frozen: FrozenUnits::default(),
                grid,
                config,
            };
            harness.refresh();
            harness
        }

        pub fn refresh(&mut self) {
            let dirty: BTreeSet<usize> = self.world.store.take_dirty();
            self.grid.sync(&self.world.store, &dirty);
            self.frozen.refresh(&self.world.store, &dirty);
        }

        pub fn run(&mut self, rule: &mut dyn Rule, tick: u64) -> (Vec<Command>, Vec<Event>) {
            let mut ctx = TickContext::new(&mut self.world, &self.frozen, &self.grid, &self.config, tick);
            let mut commands = rule.execute(&mut ctx);
            let (queued, events) = ctx.into_queued();
            commands.extend(queued);
            (commands, events)
        }
    }
}
