//! Read/write accessors presenting one logical unit over the store.
//!
//! Callers never see whether a field lives in a hot array or in the
//! cold side-table. Proxies borrow the store, so they cannot outlive a
//! structural change that might reuse their slot.

use serde_json::Value as MetaValue;

use crate::math::{Fixed, Vec2Fixed};
use crate::store::UnitStore;
use crate::unit::{ColdData, Meta, MetaPatch, Team, UnitSnapshot, UnitState};

static EMPTY_COLD: ColdData = ColdData {
    sprite: String::new(),
    abilities: Vec::new(),
    tags: std::collections::BTreeSet::new(),
    meta: std::collections::BTreeMap::new(),
    last_used: std::collections::BTreeMap::new(),
    uses: std::collections::BTreeMap::new(),
};

/// Read-only view of one active unit.
#[derive(Clone, Copy)]
pub struct UnitRef<'a> {
    store: &'a UnitStore,
    slot: usize,
}

impl<'a> UnitRef<'a> {
    pub(crate) fn new(store: &'a UnitStore, slot: usize) -> Self {
        Self { store, slot }
    }

    /// Store slot.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Stable id.
    #[must_use]
    pub fn id(&self) -> &'a str {
        self.store.slot_ids[self.slot].as_deref().unwrap_or_default()
    }

    /// Position.
    #[must_use]
    pub fn position(&self) -> Vec2Fixed {
        Vec2Fixed::new(self.store.pos_x[self.slot], self.store.pos_y[self.slot])
    }

    /// Pending move intent.
    #[must_use]
    pub fn intent(&self) -> Vec2Fixed {
        Vec2Fixed::new(self.store.intent_x[self.slot], self.store.intent_y[self.slot])
    }

    /// Current hit points.
    #[must_use]
    pub fn hp(&self) -> i32 {
        self.store.hp[self.slot]
    }

    /// Maximum hit points.
    #[must_use]
    pub fn max_hp(&self) -> i32 {
        self.store.max_hp[self.slot]
    }

    /// Base damage.
    #[must_use]
    pub fn damage(&self) -> i32 {
        self.store.damage[self.slot]
    }

    /// Mass.
    #[must_use]
    pub fn mass(&self) -> Fixed {
        self.store.mass[self.slot]
    }

    /// Team.
    #[must_use]
    pub fn team(&self) -> Team {
        self.store.team[self.slot]
    }

    /// State.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.store.state[self.slot]
    }

    /// Positive hp and not dead.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.hp() > 0 && self.state() != UnitState::Dead
    }

    /// Cold side-table entry.
    #[must_use]
    pub fn cold(&self) -> &'a ColdData {
        self.store.cold.get(self.id()).unwrap_or(&EMPTY_COLD)
    }

    /// Sprite identifier.
    #[must_use]
    pub fn sprite(&self) -> &'a str {
        &self.cold().sprite
    }

    /// Ability names.
    #[must_use]
    pub fn abilities(&self) -> &'a [String] {
        &self.cold().abilities
    }

    /// Whether the unit carries a tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.cold().tags.contains(tag)
    }

    /// Metadata bag.
    #[must_use]
    pub fn meta(&self) -> &'a Meta {
        &self.cold().meta
    }

    /// Owned copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            slot: self.slot,
            id: self.id().to_string(),
            position: self.position(),
            intent: self.intent(),
            hp: self.hp(),
            max_hp: self.max_hp(),
            damage: self.damage(),
            mass: self.mass(),
            team: self.team(),
            state: self.state(),
            cold: self.cold().clone(),
        }
    }
}

impl std::fmt::Debug for UnitRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRef")
            .field("slot", &self.slot)
            .field("id", &self.id())
            .field("hp", &self.hp())
            .finish()
    }
}

/// Mutable view of one active unit. Every write marks the slot dirty.
pub struct UnitMut<'a> {
    store: &'a mut UnitStore,
    slot: usize,
}

impl<'a> UnitMut<'a> {
    pub(crate) fn new(store: &'a mut UnitStore, slot: usize) -> Self {
        Self { store, slot }
    }

    /// Reborrow as a read proxy.
    #[must_use]
    pub fn view(&self) -> UnitRef<'_> {
        UnitRef::new(&*self.store, self.slot)
    }

    fn touch(&mut self) {
        self.store.mark_dirty(self.slot);
    }

    /// Move to an absolute position.
    pub fn set_position(&mut self, position: Vec2Fixed) {
        self.store.pos_x[self.slot] = position.x;
        self.store.pos_y[self.slot] = position.y;
        self.touch();
    }

    /// Move by a delta.
    pub fn translate(&mut self, delta: Vec2Fixed) {
        let next = self.view().position() + delta;
        self.set_position(next);
    }

    /// Record the move intent for this tick.
    pub fn set_intent(&mut self, intent: Vec2Fixed) {
        self.store.intent_x[self.slot] = intent.x;
        self.store.intent_y[self.slot] = intent.y;
        self.touch();
    }

    /// Overwrite hit points.
    pub fn set_hp(&mut self, hp: i32) {
        self.store.hp[self.slot] = hp;
        self.touch();
    }

    /// Subtract damage; a unit reaching 0 hp enters the dead state.
    ///
    /// Returns the hp actually removed.
    pub fn apply_damage(&mut self, amount: i32) -> i32 {
        let amount = amount.max(0);
        let before = self.store.hp[self.slot];
        let after = before.saturating_sub(amount);
        self.store.hp[self.slot] = after;
        if after <= 0 {
            self.store.state[self.slot] = UnitState::Dead;
        }
        self.touch();
        before.max(0) - after.max(0)
    }

    /// Add hit points, clamped to max hp. Returns the hp actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.store.hp[self.slot];
        let max = self.store.max_hp[self.slot];
        let after = before.saturating_add(amount.max(0)).min(max);
        let after = after.max(before);
        self.store.hp[self.slot] = after;
        self.touch();
        after - before
    }

    /// Overwrite base damage.
    pub fn set_damage(&mut self, damage: i32) {
        self.store.damage[self.slot] = damage;
        self.touch();
    }

    /// Overwrite mass.
    pub fn set_mass(&mut self, mass: Fixed) {
        self.store.mass[self.slot] = mass;
        self.touch();
    }

    /// Change allegiance.
    pub fn set_team(&mut self, team: Team) {
        self.store.team[self.slot] = team;
        self.touch();
    }

    /// Change state.
    pub fn set_state(&mut self, state: UnitState) {
        self.store.state[self.slot] = state;
        self.touch();
    }

    /// Mutable cold side-table entry.
    pub fn cold_mut(&mut self) -> &mut ColdData {
        self.touch();
        let id = self.store.slot_ids[self.slot].clone().unwrap_or_default();
        self.store.cold.entry(id).or_default()
    }

    /// Shallow-merge a metadata patch.
    pub fn merge_meta(&mut self, patch: &MetaPatch) {
        self.cold_mut().merge_meta(patch);
    }

    /// Set one metadata key.
    pub fn set_meta(&mut self, key: impl Into<String>, value: MetaValue) {
        self.cold_mut().meta.insert(key.into(), value);
    }

    /// Delete one metadata key.
    pub fn remove_meta(&mut self, key: &str) -> Option<MetaValue> {
        self.cold_mut().meta.remove(key)
    }

    /// Record an ability use at `tick`.
    pub fn mark_ability_used(&mut self, ability: &str, tick: u64) {
        let cold = self.cold_mut();
        cold.last_used.insert(ability.to_string(), tick);
        *cold.uses.entry(ability.to_string()).or_insert(0) += 1;
    }
}
