//! Reservation Reconciler.
//!
//! Every lookup here performs a fresh `read_all()` and refreshes the [`SlotInventory`] from
//! that snapshot as a side effect. Lookups used for write decisions return the ledger error
//! to the caller, which must then refuse the write (fail closed). Informational listings
//! fall back to the cache with a `stale` marker (fail open).

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::domain::{HolderId, Slot};
use crate::inventory::SlotInventory;
use crate::ledger::{LedgerClient, LedgerError, LedgerRecord};

/// Free slots of one day as offered to a holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotListing {
    pub day: NaiveDate,
    pub slots: Vec<Slot>,
    /// The ledger could not be read; `slots` comes from the last known cache state.
    pub stale: bool,
}

/// Outcome of resolving a holder's claim on a specific slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotClaim {
    Held(LedgerRecord),
    HeldByOther(HolderId),
    Vacant,
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerClient>,
    inventory: Arc<SlotInventory>,
    write_gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerClient>, inventory: Arc<SlotInventory>) -> Self {
        Self { ledger, inventory, write_gate: Mutex::new(()) }
    }

    pub fn ledger(&self) -> &dyn LedgerClient {
        self.ledger.as_ref()
    }

    pub fn inventory(&self) -> &SlotInventory {
        &self.inventory
    }

    /// Serializes re-validate-then-write sequences within this process. Hold the guard
    /// across the final check and the ledger write it protects.
    pub async fn write_gate(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Fresh ledger read; the inventory is rebuilt from it on success.
    pub async fn snapshot(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        match self.ledger.read_all().await {
            Ok(records) => {
                self.inventory.refresh(&records);
                Ok(records)
            }
            Err(error) => {
                warn!(event_name = "ledger.read.failed", error = %error, "ledger read failed");
                Err(error)
            }
        }
    }

    pub async fn refresh(&self) -> Result<(), LedgerError> {
        self.snapshot().await.map(|_| ())
    }

    pub async fn find_active_by_holder(
        &self,
        holder_id: HolderId,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        let records = self.snapshot().await?;
        Ok(records.into_iter().find(|record| {
            record.reservation.holder_id == holder_id && record.reservation.is_occupying()
        }))
    }

    pub async fn find_active_by_slot(
        &self,
        slot: &Slot,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        let records = self.snapshot().await?;
        Ok(records
            .into_iter()
            .find(|record| record.reservation.slot == *slot && record.reservation.is_occupying()))
    }

    /// An `Err` means occupancy is unknown and the caller must treat the slot as taken.
    pub async fn is_slot_occupied(&self, slot: &Slot) -> Result<bool, LedgerError> {
        let occupied = self.find_active_by_slot(slot).await?.is_some();
        debug!(event_name = "reconciler.slot.checked", slot = %slot, occupied, "slot occupancy checked");
        Ok(occupied)
    }

    /// Re-resolves who holds `slot` right now, relative to `holder_id`.
    pub async fn locate(&self, holder_id: HolderId, slot: &Slot) -> Result<SlotClaim, LedgerError> {
        Ok(match self.find_active_by_slot(slot).await? {
            Some(record) if record.reservation.holder_id == holder_id => SlotClaim::Held(record),
            Some(record) => SlotClaim::HeldByOther(record.reservation.holder_id),
            None => SlotClaim::Vacant,
        })
    }

    /// Free slots for a day, refreshed from the ledger when possible.
    pub async fn list_free_slots(&self, day: NaiveDate, limit: usize) -> SlotListing {
        let stale = match self.refresh().await {
            Ok(()) => false,
            Err(_) => {
                warn!(
                    event_name = "reconciler.listing.stale",
                    day = %day,
                    "listing free slots from cached inventory"
                );
                true
            }
        };
        SlotListing { day, slots: self.inventory.free_slots(day, limit), stale }
    }
}
