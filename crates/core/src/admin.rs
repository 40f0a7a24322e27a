//! Admin override: a privileged, two-step forced reminder sweep.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::domain::HolderId;
use crate::errors::{AuthorizationError, BookingError};
use crate::reminder::{ReminderWorkflow, SweepMode, SweepReport};

pub const DEFAULT_CONFIRM_WINDOW_SECS: i64 = 300;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminReply {
    /// First step accepted; `recipients` reservations would be re-notified.
    ConfirmForcedSweep { recipients: usize },
    SweepCompleted(SweepReport),
    NothingToConfirm,
    Dismissed,
}

pub struct AdminOverride {
    admin: Option<HolderId>,
    workflow: Arc<ReminderWorkflow>,
    pending: Mutex<Option<DateTime<Utc>>>,
    confirm_window: Duration,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AdminOverride {
    pub fn new(
        admin: Option<HolderId>,
        workflow: Arc<ReminderWorkflow>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admin,
            workflow,
            pending: Mutex::new(None),
            confirm_window: Duration::seconds(DEFAULT_CONFIRM_WINDOW_SECS),
            audit,
            clock,
        }
    }

    pub fn with_confirm_window(mut self, confirm_window: Duration) -> Self {
        self.confirm_window = confirm_window;
        self
    }

    pub fn is_admin(&self, holder_id: HolderId) -> bool {
        self.admin == Some(holder_id)
    }

    /// Step one: arm the forced sweep and report how many holders it would reach.
    pub async fn request_forced_sweep(
        &self,
        holder_id: HolderId,
        correlation_id: &str,
    ) -> Result<AdminReply, BookingError> {
        let context = self.authorize(holder_id, correlation_id, "admin.sweep.requested")?;
        let recipients = self.workflow.candidates(SweepMode::Forced).await?.len();
        *self.pending() = Some(self.clock.now());
        self.emit(&context, "admin.sweep.requested", AuditOutcome::Success);
        Ok(AdminReply::ConfirmForcedSweep { recipients })
    }

    /// Step two: run the armed sweep. An unarmed or expired request does nothing.
    pub async fn confirm_forced_sweep(
        &self,
        holder_id: HolderId,
        correlation_id: &str,
    ) -> Result<AdminReply, BookingError> {
        let context = self.authorize(holder_id, correlation_id, "admin.sweep.confirmed")?;
        let requested_at = self.pending().take();
        let now = self.clock.now();
        match requested_at {
            Some(at) if now - at <= self.confirm_window => {
                let report = self.workflow.sweep(SweepMode::Forced, correlation_id).await?;
                self.emit(&context, "admin.sweep.confirmed", AuditOutcome::Success);
                info!(
                    event_name = "admin.sweep.executed",
                    correlation_id,
                    holder_id = holder_id.0,
                    reminded = report.reminded,
                    "forced reminder sweep executed"
                );
                Ok(AdminReply::SweepCompleted(report))
            }
            _ => Ok(AdminReply::NothingToConfirm),
        }
    }

    pub fn dismiss(
        &self,
        holder_id: HolderId,
        correlation_id: &str,
    ) -> Result<AdminReply, BookingError> {
        let context = self.authorize(holder_id, correlation_id, "admin.sweep.dismissed")?;
        *self.pending() = None;
        self.emit(&context, "admin.sweep.dismissed", AuditOutcome::Success);
        Ok(AdminReply::Dismissed)
    }

    fn authorize(
        &self,
        holder_id: HolderId,
        correlation_id: &str,
        event_type: &str,
    ) -> Result<AuditContext, BookingError> {
        let context = AuditContext::new(Some(holder_id), correlation_id, "admin");
        if self.is_admin(holder_id) {
            return Ok(context);
        }
        self.emit(&context, event_type, AuditOutcome::Rejected);
        info!(
            event_name = "admin.access.denied",
            correlation_id,
            holder_id = holder_id.0,
            "privileged operation rejected"
        );
        Err(AuthorizationError::NotPrivileged.into())
    }

    fn emit(&self, context: &AuditContext, event_type: &str, outcome: AuditOutcome) {
        self.audit.emit(
            AuditEvent::new(context, event_type, AuditCategory::Admin, outcome)
                .occurred_at(self.clock.now()),
        );
    }

    fn pending(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
