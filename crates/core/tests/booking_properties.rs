use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use slotbook_core::booking::{BookingCommand, BookingReply, BookingService};
use slotbook_core::domain::{HolderId, Reservation, ReservationStatus, Slot, SlotCalendar};
use slotbook_core::errors::{BookingError, ConflictError};
use slotbook_core::ledger::{InMemoryLedger, LedgerClient, LedgerRecord};
use slotbook_core::reminder::{
    DeliveryError, ReminderNotifier, ReminderReply, ReminderResponse, ReminderWorkflow, SweepMode,
};
use slotbook_core::{
    ConversationStore, InMemoryAuditSink, ManualClock, Reconciler, SlotInventory,
};

const PHONE: &str = "79991234567";

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, d).expect("valid date")
}

fn slot(d: u32, hour: u32, minute: u32) -> Slot {
    Slot::new(day(d), NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time"))
}

#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<HolderId>>,
}

impl RecordingNotifier {
    fn delivered(&self) -> Vec<HolderId> {
        self.delivered.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl ReminderNotifier for RecordingNotifier {
    async fn send_reminder(&self, record: &LedgerRecord) -> Result<(), DeliveryError> {
        self.delivered.lock().expect("notifier lock").push(record.reservation.holder_id);
        Ok(())
    }
}

struct Harness {
    ledger: Arc<InMemoryLedger>,
    reconciler: Arc<Reconciler>,
    clock: Arc<ManualClock>,
    audit: InMemoryAuditSink,
}

impl Harness {
    fn new(ledger: InMemoryLedger) -> Self {
        let ledger = Arc::new(ledger);
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            Arc::new(SlotInventory::new(SlotCalendar::default())),
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 11, 9, 0, 0).single().expect("instant"),
        ));
        Self { ledger, reconciler, clock, audit: InMemoryAuditSink::default() }
    }

    fn booking(&self) -> BookingService {
        BookingService::new(
            self.reconciler.clone(),
            Arc::new(ConversationStore::new(chrono::Duration::minutes(30))),
            Arc::new(self.audit.clone()),
            self.clock.clone(),
        )
    }

    fn reminders(&self, notifier: Arc<RecordingNotifier>) -> ReminderWorkflow {
        ReminderWorkflow::new(
            self.reconciler.clone(),
            notifier,
            Arc::new(self.audit.clone()),
            self.clock.clone(),
        )
    }

    async fn records(&self) -> Vec<LedgerRecord> {
        self.ledger.read_all().await.expect("ledger readable")
    }

    async fn active_for(&self, holder: HolderId) -> Vec<LedgerRecord> {
        self.records()
            .await
            .into_iter()
            .filter(|record| {
                record.reservation.holder_id == holder && record.reservation.is_occupying()
            })
            .collect()
    }
}

/// Drives a holder from a fresh conversation up to the phone prompt for `target`.
async fn reach_phone_prompt(service: &BookingService, holder: HolderId, target: Slot) {
    let reply = service.handle(holder, BookingCommand::Start, "start").await.expect("start");
    assert!(matches!(reply, BookingReply::ChooseDay { .. }), "unexpected reply {reply:?}");
    service.handle(holder, BookingCommand::SelectDay(target.day), "day").await.expect("day");
    let reply =
        service.handle(holder, BookingCommand::SelectSlot(target), "slot").await.expect("slot");
    assert_eq!(reply, BookingReply::AskName { slot: target });
    service
        .handle(holder, BookingCommand::SubmitText("Ana".to_string()), "name")
        .await
        .expect("name");
}

async fn book(service: &BookingService, holder: HolderId, target: Slot) -> Result<BookingReply, BookingError> {
    reach_phone_prompt(service, holder, target).await;
    service.handle(holder, BookingCommand::SubmitText(PHONE.to_string()), "phone").await
}

#[tokio::test]
async fn concurrent_bookings_of_one_slot_admit_a_single_winner() {
    let harness = Harness::new(InMemoryLedger::new());
    let service = harness.booking();
    let target = slot(12, 10, 0);
    let holders = [HolderId(1), HolderId(2), HolderId(3)];
    for holder in holders {
        reach_phone_prompt(&service, holder, target).await;
    }

    let submit = |holder| {
        service.handle(holder, BookingCommand::SubmitText(PHONE.to_string()), "phone")
    };
    let (first, second, third) =
        tokio::join!(submit(holders[0]), submit(holders[1]), submit(holders[2]));
    let results = [first, second, third];

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results.iter().filter_map(|result| result.as_ref().err()).all(|error| matches!(
        error,
        BookingError::Conflict(ConflictError::SlotTaken { slot }) if *slot == target
    )));

    let occupying = harness
        .records()
        .await
        .into_iter()
        .filter(|record| record.reservation.slot == target && record.reservation.is_occupying())
        .count();
    assert_eq!(occupying, 1);
}

#[tokio::test]
async fn concurrent_bookings_by_one_holder_leave_one_reservation() {
    let harness = Harness::new(InMemoryLedger::new());
    // Two conversation stores stand in for two transport replicas sharing one ledger.
    let left = harness.booking();
    let right = harness.booking();
    let holder = HolderId(7);
    reach_phone_prompt(&left, holder, slot(12, 10, 0)).await;
    reach_phone_prompt(&right, holder, slot(13, 15, 30)).await;

    let phone = || BookingCommand::SubmitText(PHONE.to_string());
    let (a, b) =
        tokio::join!(left.handle(holder, phone(), "left"), right.handle(holder, phone(), "right"));

    assert_eq!([&a, &b].iter().filter(|result| result.is_ok()).count(), 1);
    assert!([a, b].into_iter().any(|result| matches!(
        result,
        Err(BookingError::Conflict(ConflictError::HolderAlreadyBooked { .. }))
    )));
    assert_eq!(harness.active_for(holder).await.len(), 1);
}

#[tokio::test]
async fn refresh_agrees_with_a_direct_ledger_scan() {
    let mut cancelled = Reservation::booked(HolderId(3), "Cy", PHONE, slot(12, 11, 0));
    cancelled.status = ReservationStatus::Cancelled;
    let mut pending = Reservation::booked(HolderId(4), "Di", PHONE, slot(13, 19, 30));
    pending.status = ReservationStatus::PendingConfirmation;
    let harness = Harness::new(InMemoryLedger::with_records([
        Reservation::booked(HolderId(1), "Ana", PHONE, slot(12, 10, 0)),
        cancelled,
        pending,
        // outside the calendar; must not leak into the cache
        Reservation::booked(HolderId(5), "Ed", PHONE, slot(14, 10, 0)),
    ]));
    harness.ledger.push_raw_row(vec![String::new(); 3]).await;

    harness.reconciler.refresh().await.expect("refresh");
    let records = harness.records().await;
    let inventory = harness.reconciler.inventory();
    for candidate in inventory.calendar().slots() {
        let occupied_in_ledger = records.iter().any(|record| {
            record.reservation.slot == candidate && record.reservation.is_occupying()
        });
        assert_eq!(inventory.is_free(&candidate), !occupied_in_ledger, "slot {candidate}");
    }
    assert_eq!(inventory.occupied_count(), 2);
}

#[tokio::test]
async fn cancel_then_rebook_frees_the_exact_slot() {
    let harness = Harness::new(InMemoryLedger::new());
    let service = harness.booking();
    let target = slot(12, 10, 0);

    book(&service, HolderId(1), target).await.expect("first booking");
    let reply = service
        .handle(HolderId(1), BookingCommand::CancelReservation, "cancel")
        .await
        .expect("cancel");
    assert_eq!(reply, BookingReply::ReservationCancelled { slot: target });

    let reply = book(&service, HolderId(1), target).await.expect("rebooking");
    assert!(matches!(reply, BookingReply::Booked { ref reservation } if reservation.slot == target));
    assert_eq!(harness.active_for(HolderId(1)).await.len(), 1);

    let again = service.handle(HolderId(2), BookingCommand::CancelReservation, "cancel").await;
    assert_eq!(again, Err(BookingError::NotFound));
}

#[tokio::test]
async fn change_moves_slot_accounting_in_one_step() {
    let harness = Harness::new(InMemoryLedger::new());
    let service = harness.booking();
    let holder = HolderId(1);
    let from = slot(12, 10, 0);
    let to = slot(13, 12, 30);
    book(&service, holder, from).await.expect("booking");

    let reply = service.handle(holder, BookingCommand::Start, "start").await.expect("start");
    assert!(matches!(reply, BookingReply::ManageExisting { ref reservation } if reservation.slot == from));
    let reply = service
        .handle(holder, BookingCommand::ChangeReservation, "change")
        .await
        .expect("change");
    assert_eq!(reply, BookingReply::ChooseDay { days: vec![day(12), day(13)], changing_from: Some(from) });
    service.handle(holder, BookingCommand::SelectDay(to.day), "day").await.expect("day");
    let reply = service.handle(holder, BookingCommand::SelectSlot(to), "slot").await.expect("slot");
    assert_eq!(reply, BookingReply::Changed { from, to });

    let active = harness.active_for(holder).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].reservation.slot, to);
    assert!(!harness.reconciler.is_slot_occupied(&from).await.expect("read"));
    assert!(harness.reconciler.is_slot_occupied(&to).await.expect("read"));
}

#[tokio::test]
async fn scheduled_sweeps_remind_once_and_forced_sweeps_resend() {
    let harness = Harness::new(InMemoryLedger::with_records([
        Reservation::booked(HolderId(1), "Ana", PHONE, slot(12, 10, 0)),
        Reservation::booked(HolderId(2), "Bo", PHONE, slot(12, 10, 30)),
    ]));
    let notifier = Arc::new(RecordingNotifier::default());
    let reminders = harness.reminders(notifier.clone());

    let first = reminders.sweep(SweepMode::Scheduled, "s1").await.expect("sweep");
    let second = reminders.sweep(SweepMode::Scheduled, "s2").await.expect("sweep");
    assert_eq!(first.reminded, 2);
    assert_eq!(second.reminded, 0);
    assert_eq!(notifier.delivered().len(), 2);

    let forced = reminders.sweep(SweepMode::Forced, "s3").await.expect("sweep");
    assert_eq!(forced.reminded, 2);
    assert_eq!(notifier.delivered().len(), 4);
}

#[tokio::test]
async fn booking_conflict_cancel_rebook_and_reminder_scenario() {
    let harness = Harness::new(InMemoryLedger::new());
    let service = harness.booking();
    let target = slot(12, 10, 0);
    let (ana, bo) = (HolderId(1), HolderId(2));

    let reply = book(&service, ana, target).await.expect("A books");
    let BookingReply::Booked { reservation } = reply else {
        panic!("expected a booking");
    };
    assert_eq!(reservation.name, "Ana");
    assert_eq!(reservation.phone, PHONE);
    assert_eq!(reservation.status, ReservationStatus::Booked);
    assert!(!harness.reconciler.inventory().is_free(&target));

    let writes_before = harness.ledger.mutations();
    service.handle(bo, BookingCommand::Start, "b-start").await.expect("start");
    service.handle(bo, BookingCommand::SelectDay(target.day), "b-day").await.expect("day");
    let reply =
        service.handle(bo, BookingCommand::SelectSlot(target), "b-slot").await.expect("re-offer");
    let BookingReply::ChooseSlot(choices) = reply else {
        panic!("expected the slot list again");
    };
    assert_eq!(choices.rejected, Some(ConflictError::SlotTaken { slot: target }));
    assert!(!choices.slots.contains(&target));
    assert_eq!(harness.ledger.mutations(), writes_before);
    assert!(!harness.reconciler.inventory().is_free(&target));

    service.handle(ana, BookingCommand::CancelReservation, "a-cancel").await.expect("cancel");
    assert!(harness.active_for(ana).await.is_empty());
    assert!(harness.reconciler.inventory().is_free(&target));

    service.handle(bo, BookingCommand::Abort, "b-abort").await.expect("abort");
    book(&service, bo, target).await.expect("B books the freed slot");

    let notifier = Arc::new(RecordingNotifier::default());
    let reminders = harness.reminders(notifier.clone());
    let report = reminders.sweep(SweepMode::Scheduled, "sweep").await.expect("sweep");
    assert_eq!(report.reminded, 1);
    assert_eq!(notifier.delivered(), vec![bo]);

    let pending = harness.active_for(bo).await;
    assert_eq!(pending[0].reservation.status, ReservationStatus::PendingConfirmation);
    assert!(pending[0].reservation.reminder_sent_at.is_some());

    let reply = reminders
        .respond(bo, target, ReminderResponse::Cancel, "reply")
        .await
        .expect("release");
    assert_eq!(reply, ReminderReply::ReservationReleased { slot: target });
    assert!(harness.records().await.is_empty());
    assert!(harness.reconciler.inventory().is_free(&target));
    assert!(harness
        .audit
        .event_types()
        .iter()
        .any(|event_type| event_type == "reminder.reservation.released"));
}
