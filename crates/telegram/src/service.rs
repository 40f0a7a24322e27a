use std::sync::Arc;

use async_trait::async_trait;
use slotbook_core::admin::AdminOverride;
use slotbook_core::booking::{BookingCommand, BookingService};
use slotbook_core::domain::{HolderId, SlotCalendar};
use slotbook_core::errors::BookingError;
use slotbook_core::ledger::LedgerRecord;
use slotbook_core::reminder::{DeliveryError, ReminderNotifier, ReminderResponse, ReminderWorkflow};
use tracing::{debug, warn};

use crate::api::BotApi;
use crate::blocks::{
    admin_reply_message, booking_reply_message, error_message, help_message, reminder_message,
    reminder_reply_message, OutgoingMessage,
};
use crate::commands::{ActionPayload, BotCommand};
use crate::events::{
    CallbackEvent, CallbackService, CommandMessage, CommandService, EventContext,
    EventHandlerError, HandlerResult, TextMessage, TextMessageService,
};

/// Bridges chat events to the booking, reminder and admin workflows.
pub struct BotService {
    booking: Arc<BookingService>,
    reminders: Arc<ReminderWorkflow>,
    admin: Arc<AdminOverride>,
    calendar: SlotCalendar,
}

impl BotService {
    pub fn new(
        booking: Arc<BookingService>,
        reminders: Arc<ReminderWorkflow>,
        admin: Arc<AdminOverride>,
        calendar: SlotCalendar,
    ) -> Self {
        Self { booking, reminders, admin, calendar }
    }

    async fn booking_message(
        &self,
        holder_id: HolderId,
        command: BookingCommand,
        ctx: &EventContext,
    ) -> Result<OutgoingMessage, BookingError> {
        let reply = self.booking.handle(holder_id, command, &ctx.correlation_id).await?;
        Ok(booking_reply_message(&self.calendar, &reply))
    }

    async fn callback_message(
        &self,
        holder_id: HolderId,
        payload: ActionPayload,
        ctx: &EventContext,
    ) -> Result<OutgoingMessage, BookingError> {
        let correlation_id = ctx.correlation_id.as_str();
        let command = match payload {
            ActionPayload::Day(day) => BookingCommand::SelectDay(day),
            ActionPayload::Slot(slot) => BookingCommand::SelectSlot(slot),
            ActionPayload::Back => BookingCommand::BackToDays,
            ActionPayload::ManageChange => BookingCommand::ChangeReservation,
            ActionPayload::ManageCancel => BookingCommand::CancelReservation,
            ActionPayload::Abort => BookingCommand::Abort,
            ActionPayload::ReminderAccept(slot) => {
                let reply = self
                    .reminders
                    .respond(holder_id, slot, ReminderResponse::Accept, correlation_id)
                    .await?;
                return Ok(reminder_reply_message(&reply));
            }
            ActionPayload::ReminderCancel(slot) => {
                let reply = self
                    .reminders
                    .respond(holder_id, slot, ReminderResponse::Cancel, correlation_id)
                    .await?;
                return Ok(reminder_reply_message(&reply));
            }
            ActionPayload::AdminConfirm => {
                let reply = self.admin.confirm_forced_sweep(holder_id, correlation_id).await?;
                return Ok(admin_reply_message(&reply));
            }
            ActionPayload::AdminDismiss => {
                let reply = self.admin.dismiss(holder_id, correlation_id)?;
                return Ok(admin_reply_message(&reply));
            }
        };
        self.booking_message(holder_id, command, ctx).await
    }
}

fn log_failure(error: &BookingError, holder_id: HolderId, ctx: &EventContext) {
    debug!(
        event_name = "telegram.request.failed",
        correlation_id = %ctx.correlation_id,
        holder_id = holder_id.0,
        error_class = ?error.class(),
        error = %error,
        "request answered with an error message"
    );
}

#[async_trait]
impl CommandService for BotService {
    async fn handle_command(
        &self,
        message: &CommandMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
        let holder_id = message.holder_id;
        let result = match &message.command {
            BotCommand::Start => self.booking_message(holder_id, BookingCommand::Start, ctx).await,
            BotCommand::Cancel => self.booking_message(holder_id, BookingCommand::Abort, ctx).await,
            BotCommand::Remind => self
                .admin
                .request_forced_sweep(holder_id, &ctx.correlation_id)
                .await
                .map(|reply| admin_reply_message(&reply)),
            BotCommand::Help | BotCommand::Unknown(_) => {
                Ok(help_message(self.admin.is_admin(holder_id)))
            }
        };

        Ok(Some(result.unwrap_or_else(|error| {
            log_failure(&error, holder_id, ctx);
            error_message(error.user_message())
        })))
    }
}

#[async_trait]
impl TextMessageService for BotService {
    async fn handle_text(
        &self,
        message: &TextMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
        let command = BookingCommand::SubmitText(message.text.clone());
        let reply = self.booking_message(message.holder_id, command, ctx).await;
        Ok(Some(reply.unwrap_or_else(|error| {
            log_failure(&error, message.holder_id, ctx);
            error_message(error.user_message())
        })))
    }
}

#[async_trait]
impl CallbackService for BotService {
    async fn handle_callback(
        &self,
        event: &CallbackEvent,
        payload: ActionPayload,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        match self.callback_message(event.holder_id, payload, ctx).await {
            Ok(message) => Ok(HandlerResult::Responded(message)),
            Err(error) => {
                log_failure(&error, event.holder_id, ctx);
                Ok(HandlerResult::Alert(error.user_message().to_owned()))
            }
        }
    }
}

/// Delivers reminders as a private message; holder ids double as private chat ids.
pub struct TelegramReminderNotifier {
    api: Arc<dyn BotApi>,
}

impl TelegramReminderNotifier {
    pub fn new(api: Arc<dyn BotApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ReminderNotifier for TelegramReminderNotifier {
    async fn send_reminder(&self, record: &LedgerRecord) -> Result<(), DeliveryError> {
        let holder_id = record.reservation.holder_id;
        let message = reminder_message(&record.reservation);
        self.api.send_message(holder_id.0, &message).await.map_err(|error| {
            warn!(
                event_name = "telegram.reminder.delivery_failed",
                holder_id = holder_id.0,
                error = %error,
                "reminder could not be delivered"
            );
            if error.is_unreachable_chat() {
                DeliveryError::Unreachable(holder_id)
            } else {
                DeliveryError::Transport(error.to_string())
            }
        })
    }
}
