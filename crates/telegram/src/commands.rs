//! Bot commands and the callback payload codec.
//!
//! Callback data is limited to 64 bytes by the Bot API; every payload below stays well
//! under it (`remind_ok_2026-02-12_10:30` is the longest shape).

use chrono::NaiveDate;
use slotbook_core::domain::slot::{parse_day, parse_time};
use slotbook_core::domain::{Slot, SlotParseError};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    /// Abandon the booking in progress.
    Cancel,
    /// Admin only: arm a forced reminder sweep.
    Remind,
    Help,
    Unknown(String),
}

impl BotCommand {
    /// Parses the leading `/command` of a message. `/start@slotbook_bot` addresses the
    /// same command in group chats, so the bot-name suffix is dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _bot)| name);

        Some(match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "cancel" => Self::Cancel,
            "remind" | "remind_all" => Self::Remind,
            "help" => Self::Help,
            other => Self::Unknown(other.to_owned()),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Remind => "remind",
            Self::Help => "help",
            Self::Unknown(name) => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionPayload {
    Day(NaiveDate),
    Slot(Slot),
    Back,
    ManageChange,
    ManageCancel,
    ReminderAccept(Slot),
    ReminderCancel(Slot),
    AdminConfirm,
    AdminDismiss,
    Abort,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PayloadParseError {
    #[error("unknown callback payload `{0}`")]
    Unknown(String),
    #[error("malformed slot in callback payload `{payload}`")]
    MalformedSlot { payload: String },
    #[error(transparent)]
    Slot(#[from] SlotParseError),
}

const DAY_PREFIX: &str = "day_";
const SLOT_PREFIX: &str = "slot_";
const REMIND_OK_PREFIX: &str = "remind_ok_";
const REMIND_NO_PREFIX: &str = "remind_no_";

fn encode_slot(prefix: &str, slot: &Slot) -> String {
    format!("{prefix}{}_{}", slot.day_token(), slot.time_token())
}

fn parse_slot(payload: &str, rest: &str) -> Result<Slot, PayloadParseError> {
    let (day, time) = rest
        .split_once('_')
        .ok_or_else(|| PayloadParseError::MalformedSlot { payload: payload.to_owned() })?;
    Ok(Slot::new(parse_day(day)?, parse_time(time)?))
}

impl ActionPayload {
    pub fn encode(&self) -> String {
        match self {
            Self::Day(day) => format!("{DAY_PREFIX}{}", day.format("%Y-%m-%d")),
            Self::Slot(slot) => encode_slot(SLOT_PREFIX, slot),
            Self::Back => "back".to_owned(),
            Self::ManageChange => "manage_change".to_owned(),
            Self::ManageCancel => "manage_cancel".to_owned(),
            Self::ReminderAccept(slot) => encode_slot(REMIND_OK_PREFIX, slot),
            Self::ReminderCancel(slot) => encode_slot(REMIND_NO_PREFIX, slot),
            Self::AdminConfirm => "admin_confirm".to_owned(),
            Self::AdminDismiss => "admin_dismiss".to_owned(),
            Self::Abort => "abort".to_owned(),
        }
    }

    pub fn parse(payload: &str) -> Result<Self, PayloadParseError> {
        let payload = payload.trim();
        match payload {
            "back" => return Ok(Self::Back),
            "manage_change" => return Ok(Self::ManageChange),
            "manage_cancel" => return Ok(Self::ManageCancel),
            "admin_confirm" => return Ok(Self::AdminConfirm),
            "admin_dismiss" => return Ok(Self::AdminDismiss),
            "abort" => return Ok(Self::Abort),
            _ => {}
        }

        if let Some(rest) = payload.strip_prefix(DAY_PREFIX) {
            return Ok(Self::Day(parse_day(rest)?));
        }
        if let Some(rest) = payload.strip_prefix(SLOT_PREFIX) {
            return parse_slot(payload, rest).map(Self::Slot);
        }
        if let Some(rest) = payload.strip_prefix(REMIND_OK_PREFIX) {
            return parse_slot(payload, rest).map(Self::ReminderAccept);
        }
        if let Some(rest) = payload.strip_prefix(REMIND_NO_PREFIX) {
            return parse_slot(payload, rest).map(Self::ReminderCancel);
        }
        Err(PayloadParseError::Unknown(payload.to_owned()))
    }
}
