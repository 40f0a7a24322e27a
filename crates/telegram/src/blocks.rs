use chrono::NaiveDate;
use serde::Serialize;
use slotbook_core::admin::AdminReply;
use slotbook_core::booking::{BookingReply, SlotChoices};
use slotbook_core::domain::{Reservation, Slot, SlotCalendar};
use slotbook_core::errors::BookingError;
use slotbook_core::flows::FlowState;
use slotbook_core::reminder::{ReminderReply, SweepReport};

use crate::commands::ActionPayload;

pub const SLOTS_PER_ROW: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, payload: &ActionPayload) -> Self {
        Self { text: label.into(), callback_data: payload.encode() }
    }
}

/// Serializes to the Bot API `reply_markup` shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.inline_keyboard.iter().flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<InlineKeyboard>,
}

pub struct MessageBuilder {
    lines: Vec<String>,
    rows: Vec<Vec<InlineButton>>,
}

impl MessageBuilder {
    pub fn new(first_line: impl Into<String>) -> Self {
        Self { lines: vec![first_line.into()], rows: Vec::new() }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn blank(self) -> Self {
        self.line("")
    }

    pub fn row<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut RowBuilder),
    {
        let mut builder = RowBuilder::default();
        build(&mut builder);
        if !builder.buttons.is_empty() {
            self.rows.push(builder.buttons);
        }
        self
    }

    pub fn build(self) -> OutgoingMessage {
        let keyboard =
            (!self.rows.is_empty()).then(|| InlineKeyboard { inline_keyboard: self.rows });
        OutgoingMessage { text: self.lines.join("\n"), keyboard }
    }
}

#[derive(Default)]
pub struct RowBuilder {
    buttons: Vec<InlineButton>,
}

impl RowBuilder {
    pub fn button(&mut self, label: impl Into<String>, payload: ActionPayload) -> &mut Self {
        self.buttons.push(InlineButton::new(label, &payload));
        self
    }
}

pub fn day_label(day: NaiveDate) -> String {
    day.format("%A, %-d %B").to_string()
}

fn slot_label(slot: &Slot) -> String {
    format!("{} at {}", day_label(slot.day), slot.time_token())
}

fn day_rows(builder: MessageBuilder, days: &[NaiveDate]) -> MessageBuilder {
    days.iter().fold(builder, |builder, day| {
        builder.row(|row| {
            row.button(day_label(*day), ActionPayload::Day(*day));
        })
    })
}

pub fn choose_day_message(
    calendar: &SlotCalendar,
    days: &[NaiveDate],
    changing_from: Option<Slot>,
) -> OutgoingMessage {
    let builder = match changing_from {
        Some(slot) => MessageBuilder::new(format!("🔁 Moving your reservation ({}).", slot_label(&slot)))
            .line("Pick a new day:"),
        None => MessageBuilder::new("🎉 Welcome to the event!")
            .blank()
            .line(format!(
                "🕗 Open from {} to {}, 30-minute slots, one guest per slot.",
                calendar.opening().format("%H:%M"),
                calendar.closing().format("%H:%M")
            ))
            .blank()
            .line("👉 Pick a day below:"),
    };
    day_rows(builder, days).build()
}

pub fn manage_existing_message(reservation: &Reservation) -> OutgoingMessage {
    MessageBuilder::new("📌 You already have a reservation.")
        .blank()
        .line(format!("📅 {}", slot_label(&reservation.slot)))
        .line(format!("👤 {}", reservation.name))
        .row(|row| {
            row.button("🔁 Change time", ActionPayload::ManageChange)
                .button("❌ Cancel reservation", ActionPayload::ManageCancel);
        })
        .build()
}

pub fn slot_choices_message(choices: &SlotChoices) -> OutgoingMessage {
    let mut builder = match &choices.rejected {
        Some(_) => MessageBuilder::new("⚠️ Sorry, that slot has just been taken. Pick another one:"),
        None => MessageBuilder::new(format!("Pick a time on {}:", day_label(choices.day))),
    };
    if let Some(slot) = choices.changing_from {
        builder = builder.line(format!("Current reservation: {}", slot_label(&slot)));
    }
    if choices.stale {
        builder = builder.line("(availability may be slightly out of date)");
    }
    for chunk in choices.slots.chunks(SLOTS_PER_ROW) {
        builder = builder.row(|row| {
            for slot in chunk {
                row.button(slot.time_token(), ActionPayload::Slot(*slot));
            }
        });
    }
    builder
        .row(|row| {
            row.button("⬅️ Back to day selection", ActionPayload::Back);
        })
        .build()
}

pub fn day_full_message(days: &[NaiveDate], day: NaiveDate) -> OutgoingMessage {
    day_rows(
        MessageBuilder::new(format!("❌ Every slot on {} is taken.", day_label(day)))
            .line("Pick another day:"),
        days,
    )
    .build()
}

pub fn booked_message(reservation: &Reservation) -> OutgoingMessage {
    MessageBuilder::new("✅ You are booked!")
        .blank()
        .line(format!("📅 Date: {}", day_label(reservation.slot.day)))
        .line(format!("🕗 Time: {}", reservation.slot.time_token()))
        .line(format!("👤 {}", reservation.name))
        .build()
}

pub fn text_ignored_message(state: FlowState) -> OutgoingMessage {
    let hint = match state {
        FlowState::ChoosingDay => "Please pick a day with the buttons above.",
        FlowState::ChoosingTime => "Please pick a time with the buttons above.",
        _ => "Send /start to book a slot or /help to see what I can do.",
    };
    MessageBuilder::new(hint).build()
}

pub fn booking_reply_message(calendar: &SlotCalendar, reply: &BookingReply) -> OutgoingMessage {
    match reply {
        BookingReply::ChooseDay { days, changing_from } => {
            choose_day_message(calendar, days, *changing_from)
        }
        BookingReply::ManageExisting { reservation } => manage_existing_message(reservation),
        BookingReply::ChooseSlot(choices) => slot_choices_message(choices),
        BookingReply::DayFull { day, days } => day_full_message(days, *day),
        BookingReply::AskName { slot } => {
            MessageBuilder::new(format!("🕗 {} is free.", slot_label(slot)))
                .line("Please enter your name:")
                .row(|row| {
                    row.button("✖️ Cancel", ActionPayload::Abort);
                })
                .build()
        }
        BookingReply::AskNameAgain { error } => {
            error_message(BookingError::from(error.clone()).user_message())
        }
        BookingReply::AskPhone { name } => {
            MessageBuilder::new(format!("Thanks, {name}! Now enter your phone number (digits only):"))
                .build()
        }
        BookingReply::AskPhoneAgain { error } => {
            error_message(BookingError::from(error.clone()).user_message())
        }
        BookingReply::Booked { reservation } => booked_message(reservation),
        BookingReply::Changed { from, to } => MessageBuilder::new("✅ Your reservation was moved.")
            .blank()
            .line(format!("Was: {}", slot_label(from)))
            .line(format!("Now: {}", slot_label(to)))
            .build(),
        BookingReply::ReservationCancelled { slot } => {
            MessageBuilder::new(format!("🗑 Your reservation for {} is cancelled.", slot_label(slot)))
                .line("Send /start to book again.")
                .build()
        }
        BookingReply::DraftDiscarded => {
            MessageBuilder::new("Booking cancelled. Send /start to begin again.").build()
        }
        BookingReply::TextIgnored { state } => text_ignored_message(*state),
    }
}

pub fn reminder_message(reservation: &Reservation) -> OutgoingMessage {
    let slot = reservation.slot;
    MessageBuilder::new(format!("⏰ Reminder: you are booked for {}.", slot_label(&slot)))
        .line("Will you come?")
        .row(|row| {
            row.button("✅ I'll be there", ActionPayload::ReminderAccept(slot))
                .button("❌ Cancel", ActionPayload::ReminderCancel(slot));
        })
        .build()
}

pub fn reminder_reply_message(reply: &ReminderReply) -> OutgoingMessage {
    match reply {
        ReminderReply::AttendanceConfirmed { slot } => {
            MessageBuilder::new(format!("👍 Thanks! See you on {}.", slot_label(slot))).build()
        }
        ReminderReply::ReservationReleased { slot } => {
            MessageBuilder::new(format!("🗑 Your reservation for {} is released.", slot_label(slot)))
                .build()
        }
    }
}

pub fn sweep_report_message(report: &SweepReport) -> OutgoingMessage {
    MessageBuilder::new(format!("📨 Reminder sweep ({}) finished.", report.mode))
        .line(format!("Reminded: {} of {}", report.reminded, report.candidates))
        .line(format!("Delivery failures: {}", report.delivery_failures))
        .line(format!("Ledger failures: {}", report.ledger_failures))
        .line(format!("Skipped: {}", report.skipped))
        .line(format!("Given up after repeated failures: {}", report.given_up))
        .build()
}

pub fn admin_reply_message(reply: &AdminReply) -> OutgoingMessage {
    match reply {
        AdminReply::ConfirmForcedSweep { recipients } => MessageBuilder::new(format!(
            "⚠️ This re-sends the reminder to {recipients} guest(s), including those already reminded."
        ))
        .line("Are you sure?")
        .row(|row| {
            row.button("Send reminders", ActionPayload::AdminConfirm)
                .button("Dismiss", ActionPayload::AdminDismiss);
        })
        .build(),
        AdminReply::SweepCompleted(report) => sweep_report_message(report),
        AdminReply::NothingToConfirm => {
            MessageBuilder::new("Nothing to confirm. Send /remind again.").build()
        }
        AdminReply::Dismissed => MessageBuilder::new("Reminder sweep dismissed.").build(),
    }
}

pub fn help_message(is_admin: bool) -> OutgoingMessage {
    let builder = MessageBuilder::new("Commands:")
        .line("/start: book, change or cancel your slot")
        .line("/cancel: abandon the booking in progress")
        .line("/help: show this message");
    if is_admin {
        builder.line("/remind: re-send reminders to every guest").build()
    } else {
        builder.build()
    }
}

pub fn error_message(text: &str) -> OutgoingMessage {
    MessageBuilder::new(format!("⚠️ {text}")).build()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use slotbook_core::booking::{BookingReply, SlotChoices};
    use slotbook_core::domain::{HolderId, Reservation, Slot, SlotCalendar};
    use slotbook_core::errors::ConflictError;

    use super::{booking_reply_message, reminder_message, MessageBuilder, SLOTS_PER_ROW};

    fn slot(hour: u32, minute: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2026, 2, 12).expect("date"),
            NaiveTime::from_hms_opt(hour, minute, 0).expect("time"),
        )
    }

    #[test]
    fn builder_skips_empty_rows_and_omits_empty_keyboards() {
        let message = MessageBuilder::new("hello").row(|_| {}).build();
        assert_eq!(message.text, "hello");
        assert!(message.keyboard.is_none());
    }

    #[test]
    fn day_list_offers_one_button_per_day() {
        let calendar = SlotCalendar::default();
        let reply = BookingReply::ChooseDay { days: calendar.days().to_vec(), changing_from: None };
        let message = booking_reply_message(&calendar, &reply);

        let keyboard = message.keyboard.expect("keyboard");
        let payloads: Vec<_> = keyboard.buttons().map(|b| b.callback_data.as_str()).collect();
        assert_eq!(payloads, vec!["day_2026-02-12", "day_2026-02-13"]);
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Thursday, 12 February");
        assert!(message.text.contains("10:00 to 20:00"));
    }

    #[test]
    fn slot_list_is_chunked_and_ends_with_back() {
        let slots: Vec<_> = (10..16).map(|hour| slot(hour, 0)).collect();
        let reply = BookingReply::ChooseSlot(SlotChoices {
            day: slots[0].day,
            slots: slots.clone(),
            stale: true,
            rejected: Some(ConflictError::SlotTaken { slot: slot(9, 30) }),
            changing_from: None,
        });
        let message = booking_reply_message(&SlotCalendar::default(), &reply);

        let rows = message.keyboard.expect("keyboard").inline_keyboard;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), SLOTS_PER_ROW);
        assert_eq!(rows[0][0].callback_data, "slot_2026-02-12_10:00");
        assert_eq!(rows[2][0].callback_data, "back");
        assert!(message.text.contains("just been taken"));
        assert!(message.text.contains("out of date"));
    }

    #[test]
    fn reminder_carries_accept_and_cancel_payloads() {
        let reservation = Reservation::booked(HolderId(5), "Ana", "79991234567", slot(10, 30));
        let message = reminder_message(&reservation);

        let payloads: Vec<_> = message
            .keyboard
            .expect("keyboard")
            .buttons()
            .map(|button| button.callback_data.clone())
            .collect();
        assert_eq!(payloads, vec!["remind_ok_2026-02-12_10:30", "remind_no_2026-02-12_10:30"]);
    }
}
