//! Slot Inventory: an in-process, advisory mirror of which slots are occupied.
//!
//! The cache exists to list candidate slots quickly. Decisions that claim a slot go through
//! the [`Reconciler`](crate::reconciler::Reconciler), which reads the ledger first.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;

use crate::domain::{Slot, SlotCalendar};
use crate::ledger::LedgerRecord;

#[derive(Debug)]
pub struct SlotInventory {
    calendar: SlotCalendar,
    occupied: RwLock<BTreeMap<Slot, bool>>,
}

impl SlotInventory {
    pub fn new(calendar: SlotCalendar) -> Self {
        let occupied = calendar.slots().into_iter().map(|slot| (slot, false)).collect();
        Self { calendar, occupied: RwLock::new(occupied) }
    }

    pub fn calendar(&self) -> &SlotCalendar {
        &self.calendar
    }

    /// Clears every slot to free, then marks the slots of occupying records. Records for
    /// slots outside the calendar are ignored.
    pub fn refresh(&self, records: &[LedgerRecord]) {
        let mut occupied = self.write();
        occupied.values_mut().for_each(|flag| *flag = false);
        for record in records.iter().filter(|record| record.reservation.is_occupying()) {
            if let Some(flag) = occupied.get_mut(&record.reservation.slot) {
                *flag = true;
            }
        }
    }

    /// Unknown slots are never free.
    pub fn is_free(&self, slot: &Slot) -> bool {
        self.read().get(slot).map(|occupied| !occupied).unwrap_or(false)
    }

    pub fn mark_occupied(&self, slot: &Slot) {
        self.set(slot, true);
    }

    pub fn mark_free(&self, slot: &Slot) {
        self.set(slot, false);
    }

    /// Free slots of `day` in time order, capped at `limit`.
    pub fn free_slots(&self, day: NaiveDate, limit: usize) -> Vec<Slot> {
        self.read()
            .iter()
            .filter(|(slot, occupied)| slot.day == day && !**occupied)
            .map(|(slot, _)| *slot)
            .take(limit)
            .collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.read().values().filter(|occupied| **occupied).count()
    }

    fn set(&self, slot: &Slot, value: bool) {
        if let Some(flag) = self.write().get_mut(slot) {
            *flag = value;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Slot, bool>> {
        match self.occupied.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Slot, bool>> {
        match self.occupied.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
