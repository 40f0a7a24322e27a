pub mod admin;
pub mod audit;
pub mod booking;
pub mod clock;
pub mod config;
pub mod conversations;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod inventory;
pub mod ledger;
pub mod reconciler;
pub mod reminder;

pub use admin::{AdminOverride, AdminReply};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use booking::{BookingCommand, BookingReply, BookingService, SlotChoices};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversations::ConversationStore;
pub use domain::{
    HolderId, LedgerField, LedgerPosition, Reservation, ReservationStatus, Slot, SlotCalendar,
};
pub use errors::{AuthorizationError, BookingError, ConflictError, ErrorClass, ValidationError};
pub use inventory::SlotInventory;
pub use ledger::{InMemoryLedger, LedgerClient, LedgerError, LedgerRecord, TimeoutLedger};
pub use reconciler::{Reconciler, SlotListing};
pub use reminder::{
    ReminderNotifier, ReminderResponse, ReminderSchedule, ReminderScheduler, ReminderWorkflow,
    SweepMode, SweepReport,
};
