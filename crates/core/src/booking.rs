//! Booking State Machine: drives one holder's conversation through the pure
//! [`FlowEngine`] and performs the ledger effects each transition calls for.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::conversations::{ChangeContext, Conversation, ConversationMode, ConversationStore};
use crate::domain::{FieldValue, HolderId, LedgerField, Reservation, ReservationStatus, Slot};
use crate::errors::{BookingError, ConflictError, ValidationError};
use crate::flows::{BookingFlow, FlowEngine, FlowEvent, FlowState, TransitionOutcome};
use crate::ledger::{LedgerError, LedgerRecord};
use crate::reconciler::Reconciler;

pub const MIN_NAME_CHARS: usize = 2;
pub const MIN_PHONE_DIGITS: usize = 10;
pub const DEFAULT_MAX_LISTED_SLOTS: usize = 40;

pub fn validate_name(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(ValidationError::NameTooShort { min: MIN_NAME_CHARS });
    }
    Ok(name.to_owned())
}

pub fn validate_phone(input: &str) -> Result<String, ValidationError> {
    let phone = input.trim();
    if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::PhoneNotNumeric);
    }
    if phone.len() < MIN_PHONE_DIGITS {
        return Err(ValidationError::PhoneTooShort { min: MIN_PHONE_DIGITS });
    }
    Ok(phone.to_owned())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingCommand {
    Start,
    SelectDay(NaiveDate),
    BackToDays,
    SelectSlot(Slot),
    SubmitText(String),
    ChangeReservation,
    CancelReservation,
    Abort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotChoices {
    pub day: NaiveDate,
    pub slots: Vec<Slot>,
    pub stale: bool,
    /// Set when the previous pick lost a race and the list is being re-offered.
    pub rejected: Option<ConflictError>,
    pub changing_from: Option<Slot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingReply {
    ChooseDay { days: Vec<NaiveDate>, changing_from: Option<Slot> },
    ManageExisting { reservation: Reservation },
    ChooseSlot(SlotChoices),
    DayFull { day: NaiveDate, days: Vec<NaiveDate> },
    AskName { slot: Slot },
    AskNameAgain { error: ValidationError },
    AskPhone { name: String },
    AskPhoneAgain { error: ValidationError },
    Booked { reservation: Reservation },
    Changed { from: Slot, to: Slot },
    ReservationCancelled { slot: Slot },
    DraftDiscarded,
    TextIgnored { state: FlowState },
}

pub struct BookingService {
    reconciler: Arc<Reconciler>,
    conversations: Arc<ConversationStore>,
    engine: FlowEngine<BookingFlow>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    max_listed_slots: usize,
}

impl BookingService {
    pub fn new(
        reconciler: Arc<Reconciler>,
        conversations: Arc<ConversationStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reconciler,
            conversations,
            engine: FlowEngine::default(),
            audit,
            clock,
            max_listed_slots: DEFAULT_MAX_LISTED_SLOTS,
        }
    }

    pub fn with_max_listed_slots(mut self, max_listed_slots: usize) -> Self {
        self.max_listed_slots = max_listed_slots;
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn conversation_state(&self, holder_id: HolderId) -> FlowState {
        self.conversations.load(holder_id, self.clock.now()).state
    }

    pub fn evict_idle_conversations(&self) -> usize {
        self.conversations.evict_idle(self.clock.now())
    }

    pub async fn handle(
        &self,
        holder_id: HolderId,
        command: BookingCommand,
        correlation_id: &str,
    ) -> Result<BookingReply, BookingError> {
        let _turn = self.conversations.begin_turn(holder_id).await;
        let now = self.clock.now();
        let mut conversation = self.conversations.load(holder_id, now);
        let audit = AuditContext::new(Some(holder_id), correlation_id, "booking");

        let result = match command {
            BookingCommand::Start => self.start(&mut conversation, holder_id, &audit).await,
            BookingCommand::SelectDay(day) => self.select_day(&mut conversation, day, &audit).await,
            BookingCommand::BackToDays => self.back_to_days(&mut conversation, &audit),
            BookingCommand::SelectSlot(slot) => {
                self.select_slot(&mut conversation, holder_id, slot, &audit).await
            }
            BookingCommand::SubmitText(text) => {
                self.submit_text(&mut conversation, holder_id, &text, &audit).await
            }
            BookingCommand::ChangeReservation => {
                self.begin_change(&mut conversation, holder_id, &audit).await
            }
            BookingCommand::CancelReservation => {
                self.cancel(&mut conversation, holder_id, &audit).await
            }
            BookingCommand::Abort => self.abort(&mut conversation, &audit),
        };

        if let Err(error) = &result {
            debug!(
                event_name = "booking.command.rejected",
                correlation_id,
                holder_id = holder_id.0,
                class = ?error.class(),
                error = %error,
                "booking command rejected"
            );
        }
        self.conversations.save(holder_id, conversation, now);
        result
    }

    async fn start(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        conversation.reset();
        match self.reconciler.find_active_by_holder(holder_id).await? {
            Some(record) => {
                self.advance(conversation, FlowEvent::ExistingReservationFound, audit)?;
                Ok(BookingReply::ManageExisting { reservation: record.reservation })
            }
            None => {
                self.advance(conversation, FlowEvent::StartRequested, audit)?;
                Ok(self.choose_day(None))
            }
        }
    }

    async fn select_day(
        &self,
        conversation: &mut Conversation,
        day: NaiveDate,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        let day = self
            .reconciler
            .inventory()
            .calendar()
            .resolve_day(day)
            .map_err(ValidationError::from)?;
        self.ensure_legal(conversation, FlowEvent::DaySelected)?;

        let listing = self.reconciler.list_free_slots(day, self.max_listed_slots).await;
        if listing.slots.is_empty() {
            self.advance(conversation, FlowEvent::DayFull, audit)?;
            conversation.draft.day = None;
            conversation.draft.slot = None;
            return Ok(BookingReply::DayFull { day, days: self.days() });
        }

        self.advance(conversation, FlowEvent::DaySelected, audit)?;
        conversation.draft.day = Some(day);
        conversation.draft.slot = None;
        Ok(BookingReply::ChooseSlot(SlotChoices {
            day,
            slots: listing.slots,
            stale: listing.stale,
            rejected: None,
            changing_from: conversation.mode.changing_from(),
        }))
    }

    fn back_to_days(
        &self,
        conversation: &mut Conversation,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.advance(conversation, FlowEvent::BackToDays, audit)?;
        conversation.draft.day = None;
        conversation.draft.slot = None;
        Ok(self.choose_day(conversation.mode.changing_from()))
    }

    async fn select_slot(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        slot: Slot,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        let slot = self
            .reconciler
            .inventory()
            .calendar()
            .resolve_slot(slot)
            .map_err(ValidationError::from)?;
        self.ensure_legal(conversation, FlowEvent::SlotTaken)?;

        match conversation.mode.clone() {
            ConversationMode::New => {
                self.select_new_slot(conversation, holder_id, slot, audit).await
            }
            ConversationMode::Change(change) => {
                self.change_slot(conversation, holder_id, change, slot, audit).await
            }
        }
    }

    async fn select_new_slot(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        slot: Slot,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        if let Some(existing) = self.reconciler.find_active_by_holder(holder_id).await? {
            let conflict =
                ConflictError::HolderAlreadyBooked { existing: Box::new(existing.reservation) };
            return self.abort_with_conflict(conversation, conflict, audit);
        }
        if self.reconciler.is_slot_occupied(&slot).await? {
            return self.reoffer(conversation, slot, audit);
        }

        self.advance(conversation, FlowEvent::SlotAvailable, audit)?;
        conversation.draft.day = Some(slot.day);
        conversation.draft.slot = Some(slot);
        Ok(BookingReply::AskName { slot })
    }

    async fn change_slot(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        change: ChangeContext,
        slot: Slot,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        if slot == change.previous().slot {
            return self.reoffer(conversation, slot, audit);
        }

        let _gate = self.reconciler.write_gate().await;
        if self.reconciler.is_slot_occupied(&slot).await? {
            return self.reoffer(conversation, slot, audit);
        }
        // Positions shift after deletes, so the record is re-resolved instead of trusting
        // the position captured when the change started.
        let Some(current) = self.reconciler.find_active_by_holder(holder_id).await? else {
            self.advance(conversation, FlowEvent::AbortRequested, audit)?;
            conversation.reset();
            return Err(BookingError::NotFound);
        };

        // Reminder bookkeeping belongs to the old slot; the new one is reminded afresh.
        let updates = [
            (LedgerField::Day, FieldValue::Day(slot.day)),
            (LedgerField::Time, FieldValue::Time(slot.time)),
            (LedgerField::Status, FieldValue::Status(ReservationStatus::Booked)),
            (LedgerField::ReminderSentAt, FieldValue::Empty),
            (LedgerField::AttendanceConfirmed, FieldValue::Empty),
        ];
        self.rewrite_fields(&current, &updates, audit).await?;

        let from = current.reservation.slot;
        let inventory = self.reconciler.inventory();
        inventory.mark_free(&from);
        inventory.mark_occupied(&slot);

        self.advance(conversation, FlowEvent::SlotAvailable, audit)?;
        conversation.mode = ConversationMode::New;
        conversation.draft = Default::default();
        self.audit.emit(
            AuditEvent::new(
                audit,
                "booking.reservation.changed",
                AuditCategory::Booking,
                AuditOutcome::Success,
            )
            .with_slot(slot)
            .with_metadata("from", from.to_string())
            .with_metadata("position", current.position.to_string())
            .occurred_at(self.clock.now()),
        );
        info!(
            event_name = "booking.reservation.changed",
            correlation_id = %audit.correlation_id,
            holder_id = holder_id.0,
            from = %from,
            to = %slot,
            "reservation moved to a new slot"
        );
        Ok(BookingReply::Changed { from, to: slot })
    }

    async fn submit_text(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        text: &str,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        match conversation.state {
            FlowState::EnteringName => match validate_name(text) {
                Ok(name) => {
                    self.advance(conversation, FlowEvent::NameAccepted, audit)?;
                    conversation.draft.name = Some(name.clone());
                    Ok(BookingReply::AskPhone { name })
                }
                Err(error) => {
                    self.advance(conversation, FlowEvent::NameRejected, audit)?;
                    Ok(BookingReply::AskNameAgain { error })
                }
            },
            FlowState::EnteringPhone => match validate_phone(text) {
                Ok(phone) => self.commit_booking(conversation, holder_id, phone, audit).await,
                Err(error) => {
                    self.advance(conversation, FlowEvent::PhoneRejected, audit)?;
                    Ok(BookingReply::AskPhoneAgain { error })
                }
            },
            state => Ok(BookingReply::TextIgnored { state }),
        }
    }

    async fn commit_booking(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        phone: String,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.ensure_legal(conversation, FlowEvent::BookingCommitted)?;
        let (Some(slot), Some(name)) = (conversation.draft.slot, conversation.draft.name.clone())
        else {
            return Err(crate::flows::FlowTransitionError::MissingRequiredFields {
                state: conversation.state,
                missing_fields: conversation.flow_context().missing_required_fields,
            }
            .into());
        };

        let _gate = self.reconciler.write_gate().await;
        if let Some(existing) = self.reconciler.find_active_by_holder(holder_id).await? {
            let conflict =
                ConflictError::HolderAlreadyBooked { existing: Box::new(existing.reservation) };
            return self.abort_with_conflict(conversation, conflict, audit);
        }
        if self.reconciler.is_slot_occupied(&slot).await? {
            return self.abort_with_conflict(conversation, ConflictError::SlotTaken { slot }, audit);
        }

        let reservation = Reservation::booked(holder_id, name, phone, slot);
        if let Err(error) = self.reconciler.ledger().append(&reservation).await {
            self.log_write_failure("append", &error, audit);
            return Err(error.into());
        }
        self.reconciler.inventory().mark_occupied(&slot);

        self.advance(conversation, FlowEvent::BookingCommitted, audit)?;
        conversation.mode = ConversationMode::New;
        conversation.draft = Default::default();
        self.audit.emit(
            AuditEvent::new(
                audit,
                "booking.reservation.created",
                AuditCategory::Booking,
                AuditOutcome::Success,
            )
            .with_slot(slot)
            .occurred_at(self.clock.now()),
        );
        info!(
            event_name = "booking.reservation.created",
            correlation_id = %audit.correlation_id,
            holder_id = holder_id.0,
            slot = %slot,
            "reservation created"
        );
        Ok(BookingReply::Booked { reservation })
    }

    async fn begin_change(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.ensure_legal(conversation, FlowEvent::ChangeRequested)?;
        let record =
            self.reconciler.find_active_by_holder(holder_id).await?.ok_or(BookingError::NotFound)?;

        let changing_from = record.reservation.slot;
        self.advance(conversation, FlowEvent::ChangeRequested, audit)?;
        conversation.mode = ConversationMode::Change(ChangeContext { record });
        conversation.draft = Default::default();
        Ok(self.choose_day(Some(changing_from)))
    }

    async fn cancel(
        &self,
        conversation: &mut Conversation,
        holder_id: HolderId,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.ensure_legal(conversation, FlowEvent::ReservationCancelled)?;

        let _gate = self.reconciler.write_gate().await;
        let record =
            self.reconciler.find_active_by_holder(holder_id).await?.ok_or(BookingError::NotFound)?;
        if let Err(error) = self.reconciler.ledger().delete(record.position).await {
            self.log_write_failure("delete", &error, audit);
            return Err(error.into());
        }
        let slot = record.reservation.slot;
        self.reconciler.inventory().mark_free(&slot);

        self.advance(conversation, FlowEvent::ReservationCancelled, audit)?;
        conversation.reset();
        self.audit.emit(
            AuditEvent::new(
                audit,
                "booking.reservation.cancelled",
                AuditCategory::Booking,
                AuditOutcome::Success,
            )
            .with_slot(slot)
            .with_metadata("position", record.position.to_string())
            .occurred_at(self.clock.now()),
        );
        info!(
            event_name = "booking.reservation.cancelled",
            correlation_id = %audit.correlation_id,
            holder_id = holder_id.0,
            slot = %slot,
            "reservation cancelled by holder"
        );
        Ok(BookingReply::ReservationCancelled { slot })
    }

    fn abort(
        &self,
        conversation: &mut Conversation,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.advance(conversation, FlowEvent::AbortRequested, audit)?;
        conversation.reset();
        Ok(BookingReply::DraftDiscarded)
    }

    fn reoffer(
        &self,
        conversation: &mut Conversation,
        slot: Slot,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.advance(conversation, FlowEvent::SlotTaken, audit)?;
        conversation.draft.day = Some(slot.day);
        conversation.draft.slot = None;
        debug!(
            event_name = "booking.slot.taken",
            correlation_id = %audit.correlation_id,
            slot = %slot,
            "selected slot is no longer free"
        );
        Ok(BookingReply::ChooseSlot(SlotChoices {
            day: slot.day,
            slots: self.reconciler.inventory().free_slots(slot.day, self.max_listed_slots),
            stale: false,
            rejected: Some(ConflictError::SlotTaken { slot }),
            changing_from: conversation.mode.changing_from(),
        }))
    }

    fn abort_with_conflict(
        &self,
        conversation: &mut Conversation,
        conflict: ConflictError,
        audit: &AuditContext,
    ) -> Result<BookingReply, BookingError> {
        self.advance(conversation, FlowEvent::BookingConflict, audit)?;
        conversation.reset();
        info!(
            event_name = "booking.conflict",
            correlation_id = %audit.correlation_id,
            conflict = %conflict,
            "booking aborted at final check"
        );
        Err(conflict.into())
    }

    fn advance(
        &self,
        conversation: &mut Conversation,
        event: FlowEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, BookingError> {
        let outcome = self.engine.apply_with_audit(
            &conversation.state,
            &event,
            &conversation.flow_context(),
            self.audit.as_ref(),
            audit,
        )?;
        conversation.state = outcome.to;
        Ok(outcome)
    }

    /// Rejects an event the current state cannot take, before any ledger work happens.
    fn ensure_legal(
        &self,
        conversation: &Conversation,
        event: FlowEvent,
    ) -> Result<(), BookingError> {
        self.engine.apply(&conversation.state, &event, &conversation.flow_context())?;
        Ok(())
    }

    fn choose_day(&self, changing_from: Option<Slot>) -> BookingReply {
        BookingReply::ChooseDay { days: self.days(), changing_from }
    }

    fn days(&self) -> Vec<NaiveDate> {
        self.reconciler.inventory().calendar().days().to_vec()
    }

    /// Writes `updates` to one record in order. If a write fails, the fields already written
    /// are put back from `record` so the row never points at a slot nobody checked.
    async fn rewrite_fields(
        &self,
        record: &LedgerRecord,
        updates: &[(LedgerField, FieldValue)],
        audit: &AuditContext,
    ) -> Result<(), LedgerError> {
        let ledger = self.reconciler.ledger();
        for (written, (field, value)) in updates.iter().enumerate() {
            let Err(error) = ledger.update_field(record.position, *field, value).await else {
                continue;
            };
            self.log_write_failure("update_field", &error, audit);

            for (field, _) in updates[..written].iter().rev() {
                let original = record.reservation.field_value(*field);
                if let Err(rollback_error) =
                    ledger.update_field(record.position, *field, &original).await
                {
                    error!(
                        event_name = "booking.change.rollback_failed",
                        correlation_id = %audit.correlation_id,
                        holder_id = audit.holder_id.map(|holder| holder.0),
                        position = %record.position,
                        field = ?field,
                        error = %rollback_error,
                        "could not restore reservation field after a failed change"
                    );
                }
            }
            return Err(error);
        }
        Ok(())
    }

    fn log_write_failure(
        &self,
        operation: &'static str,
        error: &LedgerError,
        audit: &AuditContext,
    ) {
        error!(
            event_name = "ledger.write.failed",
            correlation_id = %audit.correlation_id,
            holder_id = audit.holder_id.map(|holder| holder.0),
            operation,
            error = %error,
            "ledger write failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
    use tokio::sync::Notify;

    use super::{
        validate_name, validate_phone, BookingCommand, BookingReply, BookingService,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::conversations::ConversationStore;
    use crate::domain::{
        FieldValue, HolderId, LedgerField, LedgerPosition, Reservation, ReservationStatus, Slot,
        SlotCalendar,
    };
    use crate::errors::{BookingError, ConflictError, ValidationError};
    use crate::flows::FlowState;
    use crate::inventory::SlotInventory;
    use crate::ledger::{InMemoryLedger, LedgerClient, LedgerError, LedgerRecord};
    use crate::reconciler::Reconciler;

    /// Rejects exactly one `update_field` call, counted from one.
    struct FailingUpdate {
        inner: InMemoryLedger,
        fail_on: usize,
        updates: AtomicUsize,
    }

    impl FailingUpdate {
        fn new(inner: InMemoryLedger, fail_on: usize) -> Self {
            Self { inner, fail_on, updates: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LedgerClient for FailingUpdate {
        async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
            self.inner.append(reservation).await
        }

        async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
            self.inner.read_all().await
        }

        async fn update_field(
            &self,
            position: LedgerPosition,
            field: LedgerField,
            value: &FieldValue,
        ) -> Result<(), LedgerError> {
            if self.updates.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(LedgerError::Unavailable("update rejected".to_owned()));
            }
            self.inner.update_field(position, field, value).await
        }

        async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
            self.inner.delete(position).await
        }
    }

    /// Parks the next read after `armed` is set until `release` fires.
    #[derive(Default)]
    struct GatedLedger {
        inner: InMemoryLedger,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl LedgerClient for GatedLedger {
        async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
            self.inner.append(reservation).await
        }

        async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.read_all().await
        }

        async fn update_field(
            &self,
            position: LedgerPosition,
            field: LedgerField,
            value: &FieldValue,
        ) -> Result<(), LedgerError> {
            self.inner.update_field(position, field, value).await
        }

        async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
            self.inner.delete(position).await
        }
    }

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        audit: InMemoryAuditSink,
        clock: Arc<ManualClock>,
        service: BookingService,
    }

    fn harness(ledger: InMemoryLedger) -> Harness {
        let ledger = Arc::new(ledger);
        let audit = InMemoryAuditSink::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).single().expect("instant"),
        ));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            Arc::new(SlotInventory::new(SlotCalendar::default())),
        ));
        let service = BookingService::new(
            reconciler,
            Arc::new(ConversationStore::new(Duration::minutes(30))),
            Arc::new(audit.clone()),
            clock.clone(),
        );
        Harness { ledger, audit, clock, service }
    }

    fn service_over(ledger: Arc<dyn LedgerClient>) -> BookingService {
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).single().expect("instant"),
        );
        BookingService::new(
            Arc::new(Reconciler::new(
                ledger,
                Arc::new(SlotInventory::new(SlotCalendar::default())),
            )),
            Arc::new(ConversationStore::new(Duration::minutes(30))),
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(clock),
        )
    }

    fn next_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 13).expect("date")
    }

    fn slot_on(day: NaiveDate, hour: u32) -> Slot {
        Slot::new(day, NaiveTime::from_hms_opt(hour, 0, 0).expect("time"))
    }

    async fn change_to(
        service: &BookingService,
        holder: i64,
        to: Slot,
    ) -> Result<BookingReply, BookingError> {
        let holder = HolderId(holder);
        service.handle(holder, BookingCommand::ChangeReservation, "t").await?;
        service.handle(holder, BookingCommand::SelectDay(to.day), "t").await?;
        service.handle(holder, BookingCommand::SelectSlot(to), "t").await
    }

    fn reminded_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 11, 18, 0, 0).single().expect("instant")
    }

    async fn occupying_at(ledger: &dyn LedgerClient, at: Slot) -> Vec<HolderId> {
        ledger
            .read_all()
            .await
            .expect("read")
            .into_iter()
            .filter(|record| record.reservation.is_occupying() && record.reservation.slot == at)
            .map(|record| record.reservation.holder_id)
            .collect()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 12).expect("date")
    }

    fn slot(hour: u32, minute: u32) -> Slot {
        Slot::new(day(), NaiveTime::from_hms_opt(hour, minute, 0).expect("time"))
    }

    async fn send(
        harness: &Harness,
        holder: i64,
        command: BookingCommand,
    ) -> Result<BookingReply, BookingError> {
        harness.service.handle(HolderId(holder), command, "test").await
    }

    #[test]
    fn name_and_phone_rules() {
        assert_eq!(validate_name("  Ana "), Ok("Ana".to_owned()));
        assert_eq!(validate_name(" A "), Err(ValidationError::NameTooShort { min: 2 }));
        assert_eq!(validate_phone("79991234567"), Ok("79991234567".to_owned()));
        assert_eq!(validate_phone("+7999123456"), Err(ValidationError::PhoneNotNumeric));
        assert_eq!(validate_phone("123456789"), Err(ValidationError::PhoneTooShort { min: 10 }));
    }

    #[tokio::test]
    async fn invalid_input_reprompts_without_leaving_state() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect("slot");

        let reply = send(&h, 1, BookingCommand::SubmitText("A".into())).await.expect("reply");
        assert!(matches!(reply, BookingReply::AskNameAgain { .. }));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::EnteringName);

        send(&h, 1, BookingCommand::SubmitText("Ana".into())).await.expect("name");
        let reply = send(&h, 1, BookingCommand::SubmitText("12-34".into())).await.expect("reply");
        assert_eq!(
            reply,
            BookingReply::AskPhoneAgain { error: ValidationError::PhoneNotNumeric }
        );
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::EnteringPhone);
        assert_eq!(h.ledger.mutations(), 0);
    }

    #[tokio::test]
    async fn start_offers_management_when_holder_already_booked() {
        let h = harness(InMemoryLedger::with_records([Reservation::booked(
            HolderId(1),
            "Ana",
            "79991234567",
            slot(10, 0),
        )]));

        let reply = send(&h, 1, BookingCommand::Start).await.expect("start");
        assert!(matches!(reply, BookingReply::ManageExisting { .. }));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::Idle);
    }

    #[tokio::test]
    async fn start_fails_closed_when_ledger_unreadable() {
        let h = harness(InMemoryLedger::new());
        h.ledger.set_reads_failing(true);

        let error = send(&h, 1, BookingCommand::Start).await.expect_err("must fail closed");
        assert!(matches!(error, BookingError::Ledger(_)));
    }

    #[tokio::test]
    async fn unknown_day_is_a_validation_error() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");

        let other_day = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let error = send(&h, 1, BookingCommand::SelectDay(other_day)).await.expect_err("unknown");
        assert!(matches!(error, BookingError::Validation(ValidationError::UnknownSlot(_))));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::ChoosingDay);
    }

    #[tokio::test]
    async fn full_day_keeps_holder_choosing_a_day() {
        let all_taken = SlotCalendar::default()
            .slots_for(day())
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                Reservation::booked(HolderId(100 + index as i64), "Guest", "79990000000", slot)
            })
            .collect::<Vec<_>>();
        let h = harness(InMemoryLedger::with_records(all_taken));
        send(&h, 1, BookingCommand::Start).await.expect("start");

        let reply = send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        assert!(matches!(reply, BookingReply::DayFull { .. }));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::ChoosingDay);
    }

    #[tokio::test]
    async fn listing_respects_max_listed_slots() {
        let h = harness(InMemoryLedger::new());
        let service = h.service.with_max_listed_slots(5);
        service.handle(HolderId(1), BookingCommand::Start, "t").await.expect("start");

        let reply =
            service.handle(HolderId(1), BookingCommand::SelectDay(day()), "t").await.expect("day");
        let BookingReply::ChooseSlot(choices) = reply else {
            panic!("expected slot choices");
        };
        assert_eq!(choices.slots.len(), 5);
        assert!(!choices.stale);
    }

    #[tokio::test]
    async fn back_navigation_returns_to_day_choice() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");

        let reply = send(&h, 1, BookingCommand::BackToDays).await.expect("back");
        assert!(matches!(reply, BookingReply::ChooseDay { changing_from: None, .. }));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::ChoosingDay);
    }

    #[tokio::test]
    async fn slot_taken_between_listing_and_pick_is_reoffered() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        h.ledger
            .append(&Reservation::booked(HolderId(2), "Bo", "79990000000", slot(10, 0)))
            .await
            .expect("concurrent booking");

        let reply = send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect("reply");
        let BookingReply::ChooseSlot(choices) = reply else {
            panic!("expected re-offer");
        };
        assert_eq!(choices.rejected, Some(ConflictError::SlotTaken { slot: slot(10, 0) }));
        assert!(!choices.slots.contains(&slot(10, 0)));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::ChoosingTime);
    }

    #[tokio::test]
    async fn final_check_aborts_when_slot_was_taken_during_data_entry() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect("slot");
        send(&h, 1, BookingCommand::SubmitText("Ana".into())).await.expect("name");
        h.ledger
            .append(&Reservation::booked(HolderId(2), "Bo", "79990000000", slot(10, 0)))
            .await
            .expect("concurrent booking");

        let error = send(&h, 1, BookingCommand::SubmitText("79991234567".into()))
            .await
            .expect_err("conflict");
        assert_eq!(error, BookingError::Conflict(ConflictError::SlotTaken { slot: slot(10, 0) }));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::Idle);
        assert_eq!(h.ledger.read_all().await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn failed_append_keeps_phone_step_for_retry() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect("slot");
        send(&h, 1, BookingCommand::SubmitText("Ana".into())).await.expect("name");
        h.ledger.set_writes_failing(true);

        let error = send(&h, 1, BookingCommand::SubmitText("79991234567".into()))
            .await
            .expect_err("ledger down");
        assert!(matches!(error, BookingError::Ledger(_)));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::EnteringPhone);
        assert!(h.service.reconciler().inventory().is_free(&slot(10, 0)));

        h.ledger.set_writes_failing(false);
        let reply = send(&h, 1, BookingCommand::SubmitText("79991234567".into()))
            .await
            .expect("retry");
        assert!(matches!(reply, BookingReply::Booked { .. }));
    }

    #[tokio::test]
    async fn change_to_current_slot_is_reoffered() {
        let h = harness(InMemoryLedger::with_records([Reservation::booked(
            HolderId(1),
            "Ana",
            "79991234567",
            slot(10, 0),
        )]));
        send(&h, 1, BookingCommand::ChangeReservation).await.expect("change");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");

        let reply = send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect("reply");
        assert!(matches!(
            reply,
            BookingReply::ChooseSlot(ref choices) if choices.rejected.is_some()
        ));
        assert_eq!(h.ledger.mutations(), 0);
    }

    #[tokio::test]
    async fn cancel_without_reservation_is_not_found() {
        let h = harness(InMemoryLedger::new());

        let error = send(&h, 1, BookingCommand::CancelReservation).await.expect_err("nothing");
        assert_eq!(error, BookingError::NotFound);
        assert_eq!(h.ledger.mutations(), 0);
    }

    #[tokio::test]
    async fn stale_buttons_are_rejected_without_ledger_calls() {
        let h = harness(InMemoryLedger::new());

        let error = send(&h, 1, BookingCommand::SelectSlot(slot(10, 0))).await.expect_err("stale");
        assert!(matches!(error, BookingError::FlowTransition(_)));
        assert_eq!(h.ledger.mutations(), 0);
    }

    #[tokio::test]
    async fn abort_discards_draft_and_idle_conversations_expire() {
        let h = harness(InMemoryLedger::new());
        send(&h, 1, BookingCommand::Start).await.expect("start");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");

        assert_eq!(send(&h, 1, BookingCommand::Abort).await, Ok(BookingReply::DraftDiscarded));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::Idle);

        send(&h, 2, BookingCommand::Start).await.expect("start");
        h.clock.advance(Duration::minutes(31));
        assert_eq!(h.service.evict_idle_conversations(), 1);
        assert_eq!(h.service.conversation_state(HolderId(2)), FlowState::Idle);
        assert!(h.audit.event_types().iter().any(|kind| kind == "flow.transition_applied"));
    }

    #[tokio::test]
    async fn failed_change_write_puts_the_old_slot_back() {
        let ledger = Arc::new(FailingUpdate::new(
            InMemoryLedger::with_records([
                Reservation::booked(HolderId(1), "Ana", "79991234567", slot_on(day(), 10)),
                Reservation::booked(HolderId(2), "Bo", "79990000000", slot_on(next_day(), 10)),
            ]),
            2,
        ));
        let service = service_over(ledger.clone());

        let error =
            change_to(&service, 1, slot_on(next_day(), 11)).await.expect_err("time write fails");
        assert!(matches!(error, BookingError::Ledger(_)));

        let records = ledger.read_all().await.expect("read");
        assert_eq!(
            records[0].reservation,
            Reservation::booked(HolderId(1), "Ana", "79991234567", slot_on(day(), 10))
        );
        assert_eq!(
            occupying_at(ledger.as_ref(), slot_on(next_day(), 10)).await,
            vec![HolderId(2)]
        );
        assert!(occupying_at(ledger.as_ref(), slot_on(next_day(), 11)).await.is_empty());

        service.reconciler().refresh().await.expect("refresh");
        let inventory = service.reconciler().inventory();
        assert!(!inventory.is_free(&slot_on(day(), 10)));
        assert!(inventory.is_free(&slot_on(next_day(), 11)));
        assert_eq!(service.conversation_state(HolderId(1)), FlowState::ChoosingTime);
    }

    #[tokio::test]
    async fn failed_last_change_write_restores_reminder_bookkeeping() {
        let mut pending =
            Reservation::booked(HolderId(1), "Ana", "79991234567", slot_on(day(), 10));
        pending.status = ReservationStatus::PendingConfirmation;
        pending.reminder_sent_at = Some(reminded_at());
        pending.attendance_confirmed = Some(false);
        let ledger =
            Arc::new(FailingUpdate::new(InMemoryLedger::with_records([pending.clone()]), 5));
        let service = service_over(ledger.clone());

        change_to(&service, 1, slot_on(day(), 12)).await.expect_err("last write fails");

        let records = ledger.read_all().await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reservation, pending);
    }

    #[tokio::test]
    async fn change_clears_reminder_bookkeeping_of_the_old_slot() {
        let mut reminded = Reservation::booked(HolderId(1), "Ana", "79991234567", slot(10, 0));
        reminded.status = ReservationStatus::PendingConfirmation;
        reminded.reminder_sent_at = Some(reminded_at());
        reminded.attendance_confirmed = Some(true);
        let h = harness(InMemoryLedger::with_records([reminded]));

        let reply = change_to(&h.service, 1, slot(14, 0)).await.expect("changed");
        assert_eq!(reply, BookingReply::Changed { from: slot(10, 0), to: slot(14, 0) });

        let records = h.ledger.read_all().await.expect("read");
        assert_eq!(
            records[0].reservation,
            Reservation::booked(HolderId(1), "Ana", "79991234567", slot(14, 0))
        );
        assert!(h.service.reconciler().inventory().is_free(&slot(10, 0)));
        assert!(!h.service.reconciler().inventory().is_free(&slot(14, 0)));
    }

    #[tokio::test]
    async fn failed_cancel_keeps_the_reservation_and_can_be_retried() {
        let h = harness(InMemoryLedger::with_records([Reservation::booked(
            HolderId(1),
            "Ana",
            "79991234567",
            slot(10, 0),
        )]));
        h.ledger.set_writes_failing(true);

        let error = send(&h, 1, BookingCommand::CancelReservation).await.expect_err("ledger down");
        assert!(matches!(error, BookingError::Ledger(_)));
        assert_eq!(h.ledger.read_all().await.expect("read").len(), 1);
        assert!(!h.service.reconciler().inventory().is_free(&slot(10, 0)));
        assert_eq!(h.service.conversation_state(HolderId(1)), FlowState::Idle);

        h.ledger.set_writes_failing(false);
        let reply = send(&h, 1, BookingCommand::CancelReservation).await.expect("retry");
        assert_eq!(reply, BookingReply::ReservationCancelled { slot: slot(10, 0) });
        assert!(h.ledger.read_all().await.expect("read").is_empty());
        assert!(h.service.reconciler().inventory().is_free(&slot(10, 0)));
    }

    #[tokio::test]
    async fn failed_change_with_ledger_down_writes_nothing() {
        let h = harness(InMemoryLedger::with_records([Reservation::booked(
            HolderId(1),
            "Ana",
            "79991234567",
            slot(10, 0),
        )]));
        send(&h, 1, BookingCommand::ChangeReservation).await.expect("change");
        send(&h, 1, BookingCommand::SelectDay(day())).await.expect("day");
        h.ledger.set_writes_failing(true);

        let error = send(&h, 1, BookingCommand::SelectSlot(slot(11, 0))).await.expect_err("down");
        assert!(matches!(error, BookingError::Ledger(_)));
        assert_eq!(h.ledger.mutations(), 0);
        assert!(!h.service.reconciler().inventory().is_free(&slot(10, 0)));

        h.ledger.set_writes_failing(false);
        let reply = send(&h, 1, BookingCommand::SelectSlot(slot(11, 0))).await.expect("retry");
        assert_eq!(reply, BookingReply::Changed { from: slot(10, 0), to: slot(11, 0) });
    }

    #[tokio::test]
    async fn commands_from_one_holder_run_one_at_a_time() {
        let ledger = Arc::new(GatedLedger::default());
        let service = service_over(ledger.clone());
        service.handle(HolderId(1), BookingCommand::Start, "t").await.expect("start");
        service.handle(HolderId(1), BookingCommand::SelectDay(day()), "t").await.expect("day");

        ledger.armed.store(true, Ordering::SeqCst);
        let first = service.handle(HolderId(1), BookingCommand::SelectSlot(slot(10, 0)), "first");
        tokio::pin!(first);
        tokio::select! {
            _ = &mut first => panic!("first pick should wait on the gated read"),
            _ = ledger.entered.notified() => {}
        }

        let second =
            service.handle(HolderId(1), BookingCommand::SelectSlot(slot(10, 30)), "second");
        let release = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            ledger.release.notify_one();
        };
        let (first, second, ()) = tokio::join!(first, second, release);

        assert_eq!(first, Ok(BookingReply::AskName { slot: slot(10, 0) }));
        assert!(matches!(second, Err(BookingError::FlowTransition(_))));
        assert_eq!(service.conversation_state(HolderId(1)), FlowState::EnteringName);

        service
            .handle(HolderId(1), BookingCommand::SubmitText("Ana".into()), "t")
            .await
            .expect("name");
        let reply = service
            .handle(HolderId(1), BookingCommand::SubmitText("79991234567".into()), "t")
            .await
            .expect("phone");
        let BookingReply::Booked { reservation } = reply else {
            panic!("expected a booking");
        };
        assert_eq!(reservation.slot, slot(10, 0));
    }
}
