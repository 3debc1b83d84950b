//! Struct-of-arrays unit storage.
//!
//! Hot per-unit fields live in parallel, pre-allocated arrays indexed by
//! slot; cold fields live in a side-table keyed by the unit's stable id.
//! Slots are reused: [`UnitStore::add`] claims the first free slot and
//! [`UnitStore::remove`] frees it again.
//!
//! The store is the owner of record. Everything else holds slot indices
//! or ids and reads through the proxies in [`crate::proxy`].
//!
//! # Example
//!
//! ```
//! use skirmish_core::math::Vec2Fixed;
//! use skirmish_core::store::UnitStore;
//! use skirmish_core::unit::{Team, UnitSpec};
//!
//! let mut store = UnitStore::new(4);
//! let slot = store
//!     .add(UnitSpec::new("knight", Vec2Fixed::from_ints(1, 2)).with_team(Team::Friendly))
//!     .unwrap();
//!
//! let knight = store.at(slot).unwrap();
//! assert_eq!(knight.team(), Team::Friendly);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Result, SimError};
use crate::math::Fixed;
use crate::proxy::{UnitMut, UnitRef};
use crate::unit::{ColdData, Team, UnitId, UnitSnapshot, UnitSpec, UnitState};

/// Fixed-capacity unit storage.
#[derive(Debug, Clone)]
pub struct UnitStore {
    capacity: usize,

    pub(crate) active: Vec<bool>,
    pub(crate) pos_x: Vec<Fixed>,
    pub(crate) pos_y: Vec<Fixed>,
    pub(crate) intent_x: Vec<Fixed>,
    pub(crate) intent_y: Vec<Fixed>,
    pub(crate) hp: Vec<i32>,
    pub(crate) max_hp: Vec<i32>,
    pub(crate) damage: Vec<i32>,
    pub(crate) mass: Vec<Fixed>,
    pub(crate) team: Vec<Team>,
    pub(crate) state: Vec<UnitState>,
    pub(crate) slot_ids: Vec<Option<UnitId>>,

    pub(crate) cold: HashMap<UnitId, ColdData>,

    /// Sorted, compact list of active slots.
    active_indices: Vec<usize>,
    /// id -> slot cache; may go stale and is rebuilt on a miss.
    index_cache: RefCell<HashMap<UnitId, usize>>,
    /// Slots mutated since the last [`take_dirty`](Self::take_dirty).
    dirty: BTreeSet<usize>,
    /// Bumped on every mutation.
    revision: u64,
    /// Bumped on add/remove only.
    structure_version: u64,
    next_serial: u64,
}

impl UnitStore {
    /// Create a store with room for `capacity` units.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: vec![false; capacity],
            pos_x: vec![Fixed::ZERO; capacity],
            pos_y: vec![Fixed::ZERO; capacity],
            intent_x: vec![Fixed::ZERO; capacity],
            intent_y: vec![Fixed::ZERO; capacity],
            hp: vec![0; capacity],
            max_hp: vec![0; capacity],
            damage: vec![0; capacity],
            mass: vec![Fixed::ZERO; capacity],
            team: vec![Team::Neutral; capacity],
            state: vec![UnitState::Idle; capacity],
            slot_ids: vec![None; capacity],
            cold: HashMap::new(),
            active_indices: Vec::new(),
            index_cache: RefCell::new(HashMap::new()),
            dirty: BTreeSet::new(),
            revision: 0,
            structure_version: 0,
            next_serial: 1,
        }
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active_indices.len()
    }

    /// Whether the store holds no active units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_indices.is_empty()
    }

    /// Whether every slot is taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Add a unit, claiming the first free slot.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::CapacityExceeded`] when every slot is active
    /// (the store is left unchanged), or [`SimError::DuplicateUnitId`]
    /// if the explicit id is already in use.
    pub fn add(&mut self, spec: UnitSpec) -> Result<usize> {
        let Some(slot) = self.active.iter().position(|active| !active) else {
            tracing::warn!(
                capacity = self.capacity,
                sprite = %spec.sprite,
                histogram = ?self.sprite_histogram(),
                "Unit store full, spawn rejected"
            );
            return Err(SimError::CapacityExceeded {
                capacity: self.capacity,
            });
        };

        let id = match spec.id {
            Some(id) => {
                if self.index_of(&id).is_some() {
                    return Err(SimError::DuplicateUnitId(id));
                }
                id
            }
            None => self.generate_id(&spec.sprite),
        };

        self.active[slot] = true;
        self.pos_x[slot] = spec.position.x;
        self.pos_y[slot] = spec.position.y;
        self.intent_x[slot] = Fixed::ZERO;
        self.intent_y[slot] = Fixed::ZERO;
        self.hp[slot] = spec.hp;
        self.max_hp[slot] = spec.max_hp.unwrap_or(spec.hp);
        self.damage[slot] = spec.damage;
        self.mass[slot] = spec.mass;
        self.team[slot] = spec.team;
        self.state[slot] = spec.state;
        self.slot_ids[slot] = Some(id.clone());

        self.cold.insert(
            id.clone(),
            ColdData {
                sprite: spec.sprite,
                abilities: spec.abilities,
                tags: spec.tags,
                meta: spec.meta,
                last_used: BTreeMap::new(),
                uses: BTreeMap::new(),
            },
        );
        self.index_cache.borrow_mut().insert(id, slot);

        let pos = self.active_indices.partition_point(|&i| i < slot);
        self.active_indices.insert(pos, slot);

        self.structure_version += 1;
        self.mark_dirty(slot);
        Ok(slot)
    }

    /// Remove the unit in `slot`, returning its id.
    ///
    /// Frees the slot, purges cold data and drops the cached index.
    /// Returns `None` if the slot is out of range or already free.
    pub fn remove(&mut self, slot: usize) -> Option<UnitId> {
        if slot >= self.capacity || !self.active[slot] {
            return None;
        }

        self.active[slot] = false;
        self.state[slot] = UnitState::Dead;
        let id = self.slot_ids[slot].take()?;
        self.cold.remove(&id);
        self.index_cache.borrow_mut().remove(&id);
        self.active_indices.retain(|&i| i != slot);
        self.dirty.remove(&slot);

        self.structure_version += 1;
        self.revision += 1;
        Some(id)
    }

    /// Remove a unit by id.
    pub fn remove_by_id(&mut self, id: &str) -> Option<UnitId> {
        let slot = self.index_of(id)?;
        self.remove(slot)
    }

    /// Resolve an id to its slot.
    ///
    /// A stale cache entry triggers a full index rebuild before giving up.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        let cached = self.index_cache.borrow().get(id).copied();
        match cached {
            Some(slot) if self.slot_holds(slot, id) => return Some(slot),
            Some(_) => self.rebuild_index(),
            // add/remove keep the cache in step, so a miss is authoritative
            None => return None,
        }

        let slot = self.index_cache.borrow().get(id).copied()?;
        self.slot_holds(slot, id).then_some(slot)
    }

    fn slot_holds(&self, slot: usize, id: &str) -> bool {
        slot < self.capacity
            && self.active[slot]
            && self.slot_ids[slot].as_deref() == Some(id)
    }

    /// Rebuild the id -> slot cache from the slot table.
    pub fn rebuild_index(&self) {
        let mut cache = self.index_cache.borrow_mut();
        cache.clear();
        for &slot in &self.active_indices {
            if let Some(id) = &self.slot_ids[slot] {
                cache.insert(id.clone(), slot);
            }
        }
    }

    /// Whether a unit with this id is active.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    /// Sorted active slots.
    #[must_use]
    pub fn active_indices(&self) -> &[usize] {
        &self.active_indices
    }

    /// Active ids in slot order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.active_indices
            .iter()
            .filter_map(|&slot| self.slot_ids[slot].as_deref())
    }

    /// Read proxy by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<UnitRef<'_>> {
        self.index_of(id).map(|slot| UnitRef::new(self, slot))
    }

    /// Write proxy by id.
    pub fn get_mut(&mut self, id: &str) -> Option<UnitMut<'_>> {
        let slot = self.index_of(id)?;
        Some(UnitMut::new(self, slot))
    }

    /// Read proxy by slot.
    #[must_use]
    pub fn at(&self, slot: usize) -> Option<UnitRef<'_>> {
        (slot < self.capacity && self.active[slot]).then(|| UnitRef::new(self, slot))
    }

    /// Write proxy by slot.
    pub fn at_mut(&mut self, slot: usize) -> Option<UnitMut<'_>> {
        if slot < self.capacity && self.active[slot] {
            Some(UnitMut::new(self, slot))
        } else {
            None
        }
    }

    /// Iterate read proxies in slot order.
    pub fn iter(&self) -> impl Iterator<Item = UnitRef<'_>> + '_ {
        self.active_indices
            .iter()
            .map(move |&slot| UnitRef::new(self, slot))
    }

    /// Owned copies of every active unit, in slot order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        self.iter().map(|unit| unit.snapshot()).collect()
    }

    pub(crate) fn mark_dirty(&mut self, slot: usize) {
        self.dirty.insert(slot);
        self.revision += 1;
    }

    /// Slots mutated since the last call, clearing the set.
    pub fn take_dirty(&mut self) -> BTreeSet<usize> {
        std::mem::take(&mut self.dirty)
    }

    /// Slots mutated since the last [`take_dirty`](Self::take_dirty).
    #[must_use]
    pub fn dirty(&self) -> &BTreeSet<usize> {
        &self.dirty
    }

    /// Counter bumped on every mutation.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Counter bumped on add and remove.
    #[must_use]
    pub const fn structure_version(&self) -> u64 {
        self.structure_version
    }

    /// Number of active units per sprite.
    #[must_use]
    pub fn sprite_histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for unit in self.iter() {
            *histogram.entry(unit.sprite().to_string()).or_insert(0) += 1;
        }
        histogram
    }

    /// Check that the active list, slot table and cold table agree.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidState`] naming the first inconsistency found.
    pub fn check_consistency(&self) -> Result<()> {
        let flagged: Vec<usize> = (0..self.capacity).filter(|&slot| self.active[slot]).collect();
        if flagged != self.active_indices {
            return Err(SimError::InvalidState(format!(
                "active list {:?} does not match active slots {flagged:?}",
                self.active_indices
            )));
        }
        for &slot in &self.active_indices {
            let Some(id) = &self.slot_ids[slot] else {
                return Err(SimError::InvalidState(format!("active slot {slot} has no id")));
            };
            if !self.cold.contains_key(id) {
                return Err(SimError::InvalidState(format!("unit {id} has no cold data")));
            }
        }
        if self.cold.len() != self.active_indices.len() {
            return Err(SimError::InvalidState(format!(
                "{} cold entries for {} active units",
                self.cold.len(),
                self.active_indices.len()
            )));
        }
        Ok(())
    }

    fn generate_id(&mut self, sprite: &str) -> UnitId {
        loop {
            let candidate = format!("{sprite}_{}", self.next_serial);
            self.next_serial += 1;
            if self.index_of(&candidate).is_none() {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2Fixed;

    fn spec(sprite: &str) -> UnitSpec {
        UnitSpec::new(sprite, Vec2Fixed::ZERO).with_hp(10)
    }

    #[test]
    fn test_add_assigns_first_free_slot() {
        let mut store = UnitStore::new(3);
        assert_eq!(store.add(spec("a")).unwrap(), 0);
        assert_eq!(store.add(spec("b")).unwrap(), 1);
        assert_eq!(store.add(spec("c")).unwrap(), 2);

        store.remove(1);
        assert_eq!(store.add(spec("d")).unwrap(), 1);
        assert_eq!(store.active_indices(), &[0, 1, 2]);
    }

    #[test]
    fn test_capacity_exceeded_leaves_state_unchanged() {
        let mut store = UnitStore::new(1);
        store.add(spec("a")).unwrap();
        let revision = store.revision();

        let err = store.add(spec("b")).unwrap_err();
        assert!(matches!(err, SimError::CapacityExceeded { capacity: 1 }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut store = UnitStore::new(4);
        store.add(spec("a").with_id("hero")).unwrap();
        let err = store.add(spec("b").with_id("hero")).unwrap_err();
        assert!(matches!(err, SimError::DuplicateUnitId(id) if id == "hero"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mut store = UnitStore::new(8);
        store.add(spec("orc").with_id("orc_1")).unwrap();
        store.add(spec("orc")).unwrap();
        store.add(spec("orc")).unwrap();

        let mut ids: Vec<&str> = store.ids().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_remove_purges_cold_data_and_index() {
        let mut store = UnitStore::new(2);
        let slot = store.add(spec("a").with_id("x")).unwrap();
        assert_eq!(store.remove(slot).as_deref(), Some("x"));

        assert!(store.get("x").is_none());
        assert!(!store.cold.contains_key("x"));
        assert!(store.remove(slot).is_none());
    }

    #[test]
    fn test_stale_cache_rebuilds() {
        let mut store = UnitStore::new(2);
        store.add(spec("a").with_id("x")).unwrap();
        // Corrupt the cache to point at the wrong slot.
        store.index_cache.borrow_mut().insert("x".into(), 1);
        assert_eq!(store.index_of("x"), Some(0));
    }

    #[test]
    fn test_structural_changes_bump_version() {
        let mut store = UnitStore::new(2);
        let v0 = store.structure_version();
        let slot = store.add(spec("a")).unwrap();
        let v1 = store.structure_version();
        assert!(v1 > v0);

        store.at_mut(slot).unwrap().set_hp(3);
        assert_eq!(store.structure_version(), v1);

        store.remove(slot);
        assert!(store.structure_version() > v1);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut store = UnitStore::new(2);
        let a = store.add(spec("a")).unwrap();
        let b = store.add(spec("b")).unwrap();
        store.take_dirty();

        store.at_mut(b).unwrap().set_hp(1);
        let dirty = store.take_dirty();
        assert!(dirty.contains(&b));
        assert!(!dirty.contains(&a));
        assert!(store.dirty().is_empty());
    }

    #[test]
    fn test_consistency_after_churn() {
        let mut store = UnitStore::new(4);
        let a = store.add(spec("a")).unwrap();
        store.add(spec("b")).unwrap();
        store.remove(a);
        store.add(spec("c")).unwrap();
        assert!(store.check_consistency().is_ok());

        store.cold.clear();
        assert!(matches!(store.check_consistency(), Err(SimError::InvalidState(_))));
    }
}
