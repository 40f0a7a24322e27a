//! Reminder / confirmation workflow.
//!
//! A sweep moves every eligible occupying reservation to `PendingConfirmation`, asks the
//! holder to confirm or release it, and stamps `reminder_sent_at` once delivery succeeds.
//! Each record is handled on its own: a failure is counted and the sweep moves on.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::domain::{FieldValue, HolderId, LedgerField, ReservationStatus, Slot};
use crate::errors::{AuthorizationError, BookingError};
use crate::ledger::{LedgerError, LedgerRecord};
use crate::reconciler::{Reconciler, SlotClaim};

pub mod scheduler;

pub use scheduler::{ReminderSchedule, ReminderScheduler, ScheduleError};

pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SweepMode {
    /// Only records never reminded before.
    Scheduled,
    /// Every occupying record, regardless of `reminder_sent_at`.
    Forced,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub mode: SweepMode,
    pub examined: usize,
    pub candidates: usize,
    pub reminded: usize,
    pub delivery_failures: usize,
    pub ledger_failures: usize,
    /// Candidates that vanished or changed hands before they could be touched.
    pub skipped: usize,
    /// Candidates left alone by a scheduled sweep after too many failed deliveries.
    pub given_up: usize,
}

impl SweepReport {
    fn new(mode: SweepMode) -> Self {
        Self {
            mode,
            examined: 0,
            candidates: 0,
            reminded: 0,
            delivery_failures: 0,
            ledger_failures: 0,
            skipped: 0,
            given_up: 0,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("holder {0} cannot be reached")]
    Unreachable(HolderId),
    #[error("reminder transport failed: {0}")]
    Transport(String),
}

/// Outbound side of the reminder: shows the holder their slot with accept/cancel choices.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn send_reminder(&self, record: &LedgerRecord) -> Result<(), DeliveryError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReminderResponse {
    Accept,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReminderReply {
    AttendanceConfirmed { slot: Slot },
    ReservationReleased { slot: Slot },
}

enum RecordOutcome {
    Reminded,
    DeliveryFailed,
    LedgerFailed,
    Skipped,
}

pub struct ReminderWorkflow {
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn ReminderNotifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    max_delivery_attempts: u32,
    /// Failed deliveries per reservation since its last successful reminder. Process-local.
    failed_deliveries: Mutex<HashMap<(HolderId, Slot), u32>>,
}

impl ReminderWorkflow {
    pub fn new(
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn ReminderNotifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reconciler,
            notifier,
            audit,
            clock,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            failed_deliveries: Mutex::new(HashMap::new()),
        }
    }

    /// Scheduled sweeps stop retrying a reservation after this many failed deliveries.
    /// Forced sweeps always retry.
    pub fn with_max_delivery_attempts(mut self, max_delivery_attempts: u32) -> Self {
        self.max_delivery_attempts = max_delivery_attempts.max(1);
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Records a sweep in `mode` would touch, from a fresh ledger read.
    pub async fn candidates(&self, mode: SweepMode) -> Result<Vec<LedgerRecord>, LedgerError> {
        let records = self.reconciler.snapshot().await?;
        Ok(records.into_iter().filter(|record| self.is_candidate(record, mode)).collect())
    }

    fn is_candidate(&self, record: &LedgerRecord, mode: SweepMode) -> bool {
        record.reservation.is_occupying()
            && self.reconciler.inventory().calendar().contains(&record.reservation.slot)
            && (mode == SweepMode::Forced || record.reservation.reminder_sent_at.is_none())
    }

    /// Only a failure to take the initial snapshot aborts the sweep.
    pub async fn sweep(
        &self,
        mode: SweepMode,
        correlation_id: &str,
    ) -> Result<SweepReport, LedgerError> {
        let mut report = SweepReport::new(mode);
        let records = self.reconciler.snapshot().await?;
        report.examined = records.len();
        let candidates = records
            .into_iter()
            .filter(|record| self.is_candidate(record, mode))
            .collect::<Vec<_>>();
        report.candidates = candidates.len();
        self.failures().retain(|(holder_id, slot), _| {
            candidates.iter().any(|record| {
                record.reservation.holder_id == *holder_id && record.reservation.slot == *slot
            })
        });

        for candidate in &candidates {
            if mode == SweepMode::Scheduled && self.delivery_exhausted(candidate) {
                report.given_up += 1;
                continue;
            }
            match self.remind(candidate, correlation_id).await {
                RecordOutcome::Reminded => report.reminded += 1,
                RecordOutcome::DeliveryFailed => report.delivery_failures += 1,
                RecordOutcome::LedgerFailed => report.ledger_failures += 1,
                RecordOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            event_name = "reminder.sweep.completed",
            correlation_id,
            mode = %mode,
            examined = report.examined,
            candidates = report.candidates,
            reminded = report.reminded,
            delivery_failures = report.delivery_failures,
            ledger_failures = report.ledger_failures,
            skipped = report.skipped,
            given_up = report.given_up,
            "reminder sweep completed"
        );
        let context = AuditContext::new(None, correlation_id, "reminder");
        self.audit.emit(
            AuditEvent::new(
                &context,
                "reminder.sweep.completed",
                AuditCategory::Reminder,
                AuditOutcome::Success,
            )
            .with_metadata("mode", mode.to_string())
            .with_metadata("reminded", report.reminded.to_string())
            .with_metadata("delivery_failures", report.delivery_failures.to_string())
            .occurred_at(self.clock.now()),
        );
        Ok(report)
    }

    async fn remind(&self, candidate: &LedgerRecord, correlation_id: &str) -> RecordOutcome {
        let holder_id = candidate.reservation.holder_id;
        let slot = candidate.reservation.slot;
        let context = AuditContext::new(Some(holder_id), correlation_id, "reminder");

        let pending = {
            let _gate = self.reconciler.write_gate().await;
            match self.owned_record(holder_id, &slot).await {
                Ok(Some(record))
                    if record.reservation.status == ReservationStatus::PendingConfirmation =>
                {
                    Ok(Some(record))
                }
                Ok(Some(mut record)) => self
                    .write(
                        &record,
                        LedgerField::Status,
                        FieldValue::Status(ReservationStatus::PendingConfirmation),
                        correlation_id,
                    )
                    .await
                    .map(|()| {
                        record.reservation.status = ReservationStatus::PendingConfirmation;
                        Some(record)
                    }),
                Ok(None) => Ok(None),
                Err(error) => Err(error),
            }
        };
        let record = match pending {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    event_name = "reminder.record.skipped",
                    correlation_id,
                    holder_id = holder_id.0,
                    slot = %slot,
                    "reservation changed before its reminder"
                );
                return RecordOutcome::Skipped;
            }
            Err(_) => return RecordOutcome::LedgerFailed,
        };
        self.emit(&context, "reminder.status.pending", AuditOutcome::Success, slot);

        if let Err(error) = self.notifier.send_reminder(&record).await {
            let attempts = self.note_delivery_failure(holder_id, slot);
            warn!(
                event_name = "reminder.delivery.failed",
                correlation_id,
                holder_id = holder_id.0,
                slot = %slot,
                attempts,
                max_attempts = self.max_delivery_attempts,
                error = %error,
                "reminder delivery failed"
            );
            self.emit(&context, "reminder.delivery.failed", AuditOutcome::Failed, slot);
            return RecordOutcome::DeliveryFailed;
        }
        self.failures().remove(&(holder_id, slot));

        let _gate = self.reconciler.write_gate().await;
        let stamped = match self.owned_record(holder_id, &slot).await {
            Ok(Some(record)) => {
                self.write(
                    &record,
                    LedgerField::ReminderSentAt,
                    FieldValue::Timestamp(self.clock.now()),
                    correlation_id,
                )
                .await
            }
            // Released by the holder in the gap after delivery.
            Ok(None) => Ok(()),
            Err(error) => Err(error),
        };
        match stamped {
            Ok(()) => {
                self.emit(&context, "reminder.sent", AuditOutcome::Success, slot);
                RecordOutcome::Reminded
            }
            Err(_) => RecordOutcome::LedgerFailed,
        }
    }

    /// Processes the holder's answer to a reminder. The record is re-resolved by holder and
    /// slot, because its position may have shifted since the reminder was sent.
    pub async fn respond(
        &self,
        holder_id: HolderId,
        slot: Slot,
        response: ReminderResponse,
        correlation_id: &str,
    ) -> Result<ReminderReply, BookingError> {
        let context = AuditContext::new(Some(holder_id), correlation_id, "reminder");
        let _gate = self.reconciler.write_gate().await;
        let record = match self.reconciler.locate(holder_id, &slot).await? {
            SlotClaim::Held(record) => record,
            SlotClaim::HeldByOther(_) => {
                self.emit(&context, "reminder.response.rejected", AuditOutcome::Rejected, slot);
                return Err(AuthorizationError::NotReservationHolder.into());
            }
            SlotClaim::Vacant => return Err(BookingError::NotFound),
        };

        match response {
            ReminderResponse::Accept => {
                self.write(
                    &record,
                    LedgerField::Status,
                    FieldValue::Status(ReservationStatus::Booked),
                    correlation_id,
                )
                .await?;
                self.write(
                    &record,
                    LedgerField::AttendanceConfirmed,
                    FieldValue::Flag(true),
                    correlation_id,
                )
                .await?;
                self.emit(&context, "reminder.attendance.confirmed", AuditOutcome::Success, slot);
                info!(
                    event_name = "reminder.attendance.confirmed",
                    correlation_id,
                    holder_id = holder_id.0,
                    slot = %slot,
                    "holder confirmed attendance"
                );
                Ok(ReminderReply::AttendanceConfirmed { slot })
            }
            ReminderResponse::Cancel => {
                if let Err(error) = self.reconciler.ledger().delete(record.position).await {
                    self.log_write_failure(correlation_id, "delete", &error);
                    return Err(error.into());
                }
                self.reconciler.inventory().mark_free(&slot);
                self.emit(&context, "reminder.reservation.released", AuditOutcome::Success, slot);
                info!(
                    event_name = "reminder.reservation.released",
                    correlation_id,
                    holder_id = holder_id.0,
                    slot = %slot,
                    "holder released reservation from reminder"
                );
                Ok(ReminderReply::ReservationReleased { slot })
            }
        }
    }

    fn delivery_exhausted(&self, candidate: &LedgerRecord) -> bool {
        let key = (candidate.reservation.holder_id, candidate.reservation.slot);
        self.failures().get(&key).is_some_and(|attempts| *attempts >= self.max_delivery_attempts)
    }

    fn note_delivery_failure(&self, holder_id: HolderId, slot: Slot) -> u32 {
        let mut failures = self.failures();
        let attempts = failures.entry((holder_id, slot)).or_insert(0);
        *attempts += 1;
        *attempts
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<(HolderId, Slot), u32>> {
        self.failed_deliveries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn owned_record(
        &self,
        holder_id: HolderId,
        slot: &Slot,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        Ok(match self.reconciler.locate(holder_id, slot).await? {
            SlotClaim::Held(record) => Some(record),
            SlotClaim::HeldByOther(_) | SlotClaim::Vacant => None,
        })
    }

    async fn write(
        &self,
        record: &LedgerRecord,
        field: LedgerField,
        value: FieldValue,
        correlation_id: &str,
    ) -> Result<(), LedgerError> {
        self.reconciler.ledger().update_field(record.position, field, &value).await.map_err(
            |error| {
                self.log_write_failure(correlation_id, "update_field", &error);
                error
            },
        )
    }

    fn emit(&self, context: &AuditContext, event_type: &str, outcome: AuditOutcome, slot: Slot) {
        self.audit.emit(
            AuditEvent::new(context, event_type, AuditCategory::Reminder, outcome)
                .with_slot(slot)
                .occurred_at(self.clock.now()),
        );
    }

    fn log_write_failure(
        &self,
        correlation_id: &str,
        operation: &'static str,
        error: &LedgerError,
    ) {
        warn!(
            event_name = "ledger.write.failed",
            correlation_id,
            operation,
            error = %error,
            "ledger write failed during reminder processing"
        );
    }
}
