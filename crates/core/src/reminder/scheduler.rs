use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ReminderWorkflow, SweepMode, SweepReport};
use crate::clock::Clock;
use crate::ledger::LedgerError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("reminder time {local} does not exist in {timezone}")]
    NonexistentLocalTime { local: NaiveDateTime, timezone: Tz },
    #[error("reminder tick interval must be greater than zero")]
    ZeroTick,
}

/// When the autonomous sweep becomes due, and how often the scheduler checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderSchedule {
    trigger_at: DateTime<Utc>,
    tick: Duration,
}

impl ReminderSchedule {
    pub fn new(trigger_at: DateTime<Utc>, tick: Duration) -> Result<Self, ScheduleError> {
        if tick.is_zero() {
            return Err(ScheduleError::ZeroTick);
        }
        Ok(Self { trigger_at, tick })
    }

    /// Interprets `local` as wall-clock time in `timezone`. An ambiguous local time (clocks
    /// going back) resolves to the earlier instant.
    pub fn from_local(
        local: NaiveDateTime,
        timezone: Tz,
        tick: Duration,
    ) -> Result<Self, ScheduleError> {
        let trigger_at = match timezone.from_local_datetime(&local) {
            LocalResult::Single(at) => at,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                return Err(ScheduleError::NonexistentLocalTime { local, timezone })
            }
        };
        Self::new(trigger_at.with_timezone(&Utc), tick)
    }

    pub fn trigger_at(&self) -> DateTime<Utc> {
        self.trigger_at
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.trigger_at
    }
}

/// Runs the scheduled sweep on a recurring tick once the trigger instant has passed.
/// Scheduled sweeps only pick up records that were never reminded, so repeated ticks after
/// the trigger are cheap no-ops once everyone has been reached.
pub struct ReminderScheduler {
    workflow: Arc<ReminderWorkflow>,
    schedule: ReminderSchedule,
    clock: Arc<dyn Clock>,
}

impl ReminderScheduler {
    pub fn new(
        workflow: Arc<ReminderWorkflow>,
        schedule: ReminderSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { workflow, schedule, clock }
    }

    pub fn schedule(&self) -> &ReminderSchedule {
        &self.schedule
    }

    /// One scheduler tick. `None` when the trigger instant has not passed yet.
    pub async fn tick(&self) -> Option<Result<SweepReport, LedgerError>> {
        if !self.schedule.is_due(self.clock.now()) {
            debug!(
                event_name = "reminder.tick.not_due",
                trigger_at = %self.schedule.trigger_at(),
                "reminder trigger not reached"
            );
            return None;
        }
        let correlation_id = format!("sweep-{}", Uuid::new_v4());
        let result = self.workflow.sweep(SweepMode::Scheduled, &correlation_id).await;
        if let Err(error) = &result {
            warn!(
                event_name = "reminder.sweep.failed",
                correlation_id = %correlation_id,
                error = %error,
                "reminder sweep could not read the ledger"
            );
        }
        Some(result)
    }

    /// Ticks until `shutdown` flips to `true` or its sender is dropped. Shutdown is only
    /// observed between ticks; a sweep in progress always runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "reminder.scheduler.started",
            trigger_at = %self.schedule.trigger_at(),
            tick_secs = self.schedule.tick().as_secs(),
            "reminder scheduler started"
        );
        let mut interval = tokio::time::interval(self.schedule.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(event_name = "reminder.scheduler.stopped", "reminder scheduler stopped");
    }
}
