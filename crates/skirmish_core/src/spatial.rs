//! Uniform bucket grid over the field for radius and rect queries.
//!
//! The grid stores slot indices only. It is rebuilt from scratch when
//! the active unit count changes and otherwise re-buckets just the
//! slots that were dirtied since the last refresh. Query results are
//! always returned in ascending slot order.

use std::collections::BTreeSet;

use crate::math::{Fixed, Vec2Fixed};
use crate::store::UnitStore;

/// Grid cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellCoord {
    x: i64,
    y: i64,
}

/// Spatial partition of unit slots.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: Fixed,
    cols: i64,
    rows: i64,
    cells: Vec<Vec<usize>>,
    /// Cell each slot is currently bucketed in.
    slot_cell: Vec<Option<usize>>,
    indexed_count: usize,
}

impl SpatialGrid {
    /// Create an empty grid covering `width x height` with square cells.
    #[must_use]
    pub fn new(width: u32, height: u32, cell_size: u32, capacity: usize) -> Self {
        let cell_size = cell_size.max(1);
        let cols = i64::from(width.div_ceil(cell_size).max(1));
        let rows = i64::from(height.div_ceil(cell_size).max(1));
        Self {
            cell_size: Fixed::from_num(cell_size),
            cols,
            rows,
            cells: vec![Vec::new(); (cols * rows) as usize],
            slot_cell: vec![None; capacity],
            indexed_count: 0,
        }
    }

    /// Number of slots currently bucketed.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.indexed_count
    }

    fn cell_of(&self, position: Vec2Fixed) -> CellCoord {
        let cx = (position.x / self.cell_size).floor().to_num::<i64>();
        let cy = (position.y / self.cell_size).floor().to_num::<i64>();
        CellCoord {
            x: cx.clamp(0, self.cols - 1),
            y: cy.clamp(0, self.rows - 1),
        }
    }

    fn cell_index(&self, coord: CellCoord) -> usize {
        (coord.y * self.cols + coord.x) as usize
    }

    /// Re-bucket every active unit.
    pub fn rebuild(&mut self, store: &UnitStore) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.slot_cell.iter_mut().for_each(|c| *c = None);
        self.indexed_count = 0;

        for unit in store.iter() {
            self.insert(unit.slot(), unit.position());
        }
    }

    /// Re-bucket only the given slots.
    pub fn refresh(&mut self, store: &UnitStore, dirty: &BTreeSet<usize>) {
        for &slot in dirty {
            self.evict(slot);
            if let Some(unit) = store.at(slot) {
                self.insert(slot, unit.position());
            }
        }
    }

    /// Rebuild when the active count changed, otherwise refresh dirty slots.
    pub fn sync(&mut self, store: &UnitStore, dirty: &BTreeSet<usize>) {
        if store.len() != self.indexed_count {
            self.rebuild(store);
        } else if !dirty.is_empty() {
            self.refresh(store, dirty);
        }
    }

    fn insert(&mut self, slot: usize, position: Vec2Fixed) {
        if slot >= self.slot_cell.len() {
            return;
        }
        let cell = self.cell_index(self.cell_of(position));
        self.slot_cell[slot] = Some(cell);
        let bucket = &mut self.cells[cell];
        let pos = bucket.partition_point(|&s| s < slot);
        bucket.insert(pos, slot);
        self.indexed_count += 1;
    }

    fn evict(&mut self, slot: usize) {
        let Some(cell) = self.slot_cell.get_mut(slot).and_then(Option::take) else {
            return;
        };
        self.cells[cell].retain(|&s| s != slot);
        self.indexed_count -= 1;
    }

    /// Slots of active units within `radius` of `center`, ascending.
    #[must_use]
    pub fn query_radius(&self, store: &UnitStore, center: Vec2Fixed, radius: Fixed) -> Vec<usize> {
        let min = Vec2Fixed::new(center.x - radius, center.y - radius);
        let max = Vec2Fixed::new(center.x + radius, center.y + radius);
        let radius_sq = radius.saturating_mul(radius);

        self.candidates(min, max)
            .into_iter()
            .filter(|&slot| {
                store
                    .at(slot)
                    .is_some_and(|unit| unit.position().distance_squared(center) <= radius_sq)
            })
            .collect()
    }

    /// Slots of active units inside the axis-aligned rectangle, ascending.
    #[must_use]
    pub fn query_rect(&self, store: &UnitStore, min: Vec2Fixed, max: Vec2Fixed) -> Vec<usize> {
        self.candidates(min, max)
            .into_iter()
            .filter(|&slot| {
                store.at(slot).is_some_and(|unit| {
                    let p = unit.position();
                    p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
                })
            })
            .collect()
    }

    /// Unordered pairs `(a, b)` with `a < b` whose units are within `radius`.
    #[must_use]
    pub fn neighbor_pairs(&self, store: &UnitStore, radius: Fixed) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for unit in store.iter() {
            let a = unit.slot();
            for b in self.query_radius(store, unit.position(), radius) {
                if b > a {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    fn candidates(&self, min: Vec2Fixed, max: Vec2Fixed) -> Vec<usize> {
        let lo = self.cell_of(min);
        let hi = self.cell_of(max);
        let mut out = Vec::new();
        for cy in lo.y..=hi.y {
            for cx in lo.x..=hi.x {
                let idx = self.cell_index(CellCoord { x: cx, y: cy });
                out.extend_from_slice(&self.cells[idx]);
            }
        }
        out.sort_unstable();
        out
    }
}
