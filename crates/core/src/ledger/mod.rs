//! Ledger Client contract.
//!
//! The ledger is the remote, authoritative table of reservations. Every call is a network
//! round trip that may fail or stall, and no two calls form a transaction: positions read by
//! one call may already have shifted by the time the next call runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::domain::{FieldValue, LedgerField, LedgerPosition, Reservation};

pub mod memory;

pub use memory::InMemoryLedger;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected credentials: {0}")]
    Unauthorized(String),
    #[error("ledger rate limit reached: {0}")]
    RateLimited(String),
    #[error("ledger {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },
    #[error("ledger position {0} does not exist")]
    PositionOutOfRange(LedgerPosition),
    #[error("ledger returned malformed data: {0}")]
    Malformed(String),
}

/// A reservation together with the position it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRecord {
    pub position: LedgerPosition,
    pub reservation: Reservation,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError>;

    /// All decodable records in table order.
    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError>;

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError>;

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError>;
}

#[async_trait]
impl<L> LedgerClient for Arc<L>
where
    L: LedgerClient + ?Sized,
{
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        (**self).append(reservation).await
    }

    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        (**self).read_all().await
    }

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError> {
        (**self).update_field(position, field, value).await
    }

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        (**self).delete(position).await
    }
}

/// Decodes raw data rows (header excluded) into records. Undecodable rows are skipped but
/// still consume their position.
pub fn decode_rows<I>(rows: I) -> Vec<LedgerRecord>
where
    I: IntoIterator<Item = Vec<String>>,
{
    rows.into_iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let position = LedgerPosition::from_record_index(index);
            if row.iter().all(|cell| cell.trim().is_empty()) {
                return None;
            }
            match Reservation::from_row(&row) {
                Ok(reservation) => Some(LedgerRecord { position, reservation }),
                Err(error) => {
                    warn!(
                        event_name = "ledger.row.skipped",
                        position = position.row(),
                        error = %error,
                        "skipping undecodable ledger row"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Bounds every ledger call with a timeout; an elapsed timeout surfaces as
/// [`LedgerError::Timeout`].
pub struct TimeoutLedger<L> {
    inner: L,
    timeout: Duration,
}

impl<L> TimeoutLedger<L>
where
    L: LedgerClient,
{
    pub fn new(inner: L, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn elapsed(&self, operation: &'static str) -> LedgerError {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(event_name = "ledger.call.timeout", operation, timeout_ms, "ledger call timed out");
        LedgerError::Timeout { operation, timeout_ms }
    }
}

#[async_trait]
impl<L> LedgerClient for TimeoutLedger<L>
where
    L: LedgerClient,
{
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        tokio::time::timeout(self.timeout, self.inner.append(reservation))
            .await
            .map_err(|_| self.elapsed("append"))?
    }

    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        tokio::time::timeout(self.timeout, self.inner.read_all())
            .await
            .map_err(|_| self.elapsed("read_all"))?
    }

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError> {
        tokio::time::timeout(self.timeout, self.inner.update_field(position, field, value))
            .await
            .map_err(|_| self.elapsed("update_field"))?
    }

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        tokio::time::timeout(self.timeout, self.inner.delete(position))
            .await
            .map_err(|_| self.elapsed("delete"))?
    }
}
