use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{decode_rows, LedgerClient, LedgerError, LedgerRecord};
use crate::domain::{FieldValue, LedgerField, LedgerPosition, Reservation};

/// Process-local ledger that stores raw rows exactly like a spreadsheet would, so deletes
/// shift the positions of every later row.
#[derive(Default)]
pub struct InMemoryLedger {
    rows: RwLock<Vec<Vec<String>>>,
    reads_failing: AtomicBool,
    writes_failing: AtomicBool,
    mutations: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records<I>(reservations: I) -> Self
    where
        I: IntoIterator<Item = Reservation>,
    {
        let rows = reservations.into_iter().map(|reservation| reservation.to_row()).collect();
        Self { rows: RwLock::new(rows), ..Self::default() }
    }

    /// Appends a row verbatim, bypassing decoding. Used to model hand-edited tables.
    pub async fn push_raw_row(&self, row: Vec<String>) {
        self.rows.write().await.push(row);
    }

    pub fn set_reads_failing(&self, failing: bool) {
        self.reads_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_writes_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful append/update/delete calls.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }

    fn check_writable(&self) -> Result<(), LedgerError> {
        if self.writes_failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected write failure".to_owned()));
        }
        Ok(())
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.check_writable()?;
        self.rows.write().await.push(reservation.to_row());
        self.record_mutation();
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        if self.reads_failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected read failure".to_owned()));
        }
        Ok(decode_rows(self.rows.read().await.clone()))
    }

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError> {
        self.check_writable()?;
        let mut rows = self.rows.write().await;
        let row = position
            .record_index()
            .and_then(|index| rows.get_mut(index))
            .ok_or(LedgerError::PositionOutOfRange(position))?;
        let column = field.column_index();
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = value.to_cell();
        self.record_mutation();
        Ok(())
    }

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        self.check_writable()?;
        let mut rows = self.rows.write().await;
        match position.record_index() {
            Some(index) if index < rows.len() => {
                rows.remove(index);
                self.record_mutation();
                Ok(())
            }
            _ => Err(LedgerError::PositionOutOfRange(position)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::InMemoryLedger;
    use crate::domain::{
        FieldValue, HolderId, LedgerField, LedgerPosition, Reservation, ReservationStatus, Slot,
    };
    use crate::ledger::{LedgerClient, LedgerError};

    fn reservation(holder: i64, hour: u32) -> Reservation {
        Reservation::booked(
            HolderId(holder),
            "Guest",
            "79990000000",
            Slot::new(
                NaiveDate::from_ymd_opt(2026, 2, 12).expect("date"),
                NaiveTime::from_hms_opt(hour, 0, 0).expect("time"),
            ),
        )
    }

    #[tokio::test]
    async fn delete_shifts_later_positions() {
        let ledger = InMemoryLedger::with_records([
            reservation(1, 10),
            reservation(2, 11),
            reservation(3, 12),
        ]);

        ledger.delete(LedgerPosition(3)).await.expect("delete second record");

        let records = ledger.read_all().await.expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].position, LedgerPosition(3));
        assert_eq!(records[1].reservation.holder_id, HolderId(3));
    }

    #[tokio::test]
    async fn update_field_rewrites_one_cell() {
        let ledger = InMemoryLedger::with_records([reservation(1, 10)]);

        ledger
            .update_field(
                LedgerPosition::FIRST_RECORD,
                LedgerField::Status,
                &FieldValue::Status(ReservationStatus::PendingConfirmation),
            )
            .await
            .expect("update");

        let records = ledger.read_all().await.expect("read");
        assert_eq!(records[0].reservation.status, ReservationStatus::PendingConfirmation);
        assert_eq!(ledger.mutations(), 1);
    }

    #[tokio::test]
    async fn out_of_range_positions_are_rejected() {
        let ledger = InMemoryLedger::with_records([reservation(1, 10)]);

        assert_eq!(
            ledger.delete(LedgerPosition(9)).await,
            Err(LedgerError::PositionOutOfRange(LedgerPosition(9)))
        );
        assert_eq!(
            ledger.delete(LedgerPosition(1)).await,
            Err(LedgerError::PositionOutOfRange(LedgerPosition(1)))
        );
        assert_eq!(ledger.mutations(), 0);
    }

    #[tokio::test]
    async fn injected_failures_leave_rows_untouched() {
        let ledger = InMemoryLedger::with_records([reservation(1, 10)]);
        ledger.set_writes_failing(true);
        ledger.set_reads_failing(true);

        assert!(ledger.append(&reservation(2, 11)).await.is_err());
        assert!(ledger.read_all().await.is_err());

        ledger.set_reads_failing(false);
        assert_eq!(ledger.read_all().await.expect("read").len(), 1);
    }
}
