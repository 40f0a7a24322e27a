use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::slot::{parse_day, parse_time, Slot, DAY_FORMAT, TIME_FORMAT};

/// Opaque numeric identity of the person holding (or requesting) a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HolderId(pub i64);

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based row number of a record in the ledger table. Row 1 is the header, so the
/// first record lives at position 2. Positions shift after a delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerPosition(pub u32);

impl LedgerPosition {
    pub const FIRST_RECORD: Self = Self(2);

    pub fn row(self) -> u32 {
        self.0
    }

    /// Zero-based index into the list of data rows (header excluded).
    pub fn record_index(self) -> Option<usize> {
        self.0.checked_sub(Self::FIRST_RECORD.0).map(|index| index as usize)
    }

    pub fn from_record_index(index: usize) -> Self {
        let index = u32::try_from(index).unwrap_or(u32::MAX - Self::FIRST_RECORD.0);
        Self(index.saturating_add(Self::FIRST_RECORD.0))
    }
}

impl fmt::Display for LedgerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Booked,
    PendingConfirmation,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::PendingConfirmation => "pending_confirmation",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that count toward slot and holder exclusivity.
    pub fn is_occupying(self) -> bool {
        matches!(self, Self::Booked | Self::PendingConfirmation)
    }
}

impl FromStr for ReservationStatus {
    type Err = RowDecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            // hand-entered rows without a status still hold their slot
            "" | "booked" => Ok(Self::Booked),
            "pending_confirmation" | "pending" => Ok(Self::PendingConfirmation),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(RowDecodeError::Status(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub holder_id: HolderId,
    pub name: String,
    pub phone: String,
    pub slot: Slot,
    pub status: ReservationStatus,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub attendance_confirmed: Option<bool>,
}

impl Reservation {
    pub fn booked(
        holder_id: HolderId,
        name: impl Into<String>,
        phone: impl Into<String>,
        slot: Slot,
    ) -> Self {
        Self {
            holder_id,
            name: name.into(),
            phone: phone.into(),
            slot,
            status: ReservationStatus::Booked,
            reminder_sent_at: None,
            attendance_confirmed: None,
        }
    }

    pub fn is_occupying(&self) -> bool {
        self.status.is_occupying()
    }

    /// The value this reservation holds in one ledger column.
    pub fn field_value(&self, field: LedgerField) -> FieldValue {
        match field {
            LedgerField::HolderId => FieldValue::Text(self.holder_id.to_string()),
            LedgerField::Name => FieldValue::Text(self.name.clone()),
            LedgerField::Phone => FieldValue::Text(self.phone.clone()),
            LedgerField::Day => FieldValue::Day(self.slot.day),
            LedgerField::Time => FieldValue::Time(self.slot.time),
            LedgerField::Status => FieldValue::Status(self.status),
            LedgerField::ReminderSentAt => {
                self.reminder_sent_at.map(FieldValue::Timestamp).unwrap_or(FieldValue::Empty)
            }
            LedgerField::AttendanceConfirmed => {
                self.attendance_confirmed.map(FieldValue::Flag).unwrap_or(FieldValue::Empty)
            }
        }
    }

    /// Cells in ledger column order.
    pub fn to_row(&self) -> Vec<String> {
        LedgerField::ALL.iter().map(|field| self.field_value(*field).to_cell()).collect()
    }

    /// Decodes a data row. Trailing empty cells may be missing entirely.
    pub fn from_row(row: &[String]) -> Result<Self, RowDecodeError> {
        let cell = |field: LedgerField| {
            row.get(field.column_index()).map(|value| value.trim()).unwrap_or_default()
        };

        let holder_raw = cell(LedgerField::HolderId);
        let holder_id = holder_raw
            .parse::<i64>()
            .map(HolderId)
            .map_err(|_| RowDecodeError::HolderId(holder_raw.to_owned()))?;
        let day = parse_day(cell(LedgerField::Day))
            .map_err(|_| RowDecodeError::Day(cell(LedgerField::Day).to_owned()))?;
        let time = parse_time(cell(LedgerField::Time))
            .map_err(|_| RowDecodeError::Time(cell(LedgerField::Time).to_owned()))?;
        let status = cell(LedgerField::Status).parse::<ReservationStatus>()?;

        let reminder_raw = cell(LedgerField::ReminderSentAt);
        let reminder_sent_at = if reminder_raw.is_empty() {
            None
        } else {
            Some(
                DateTime::parse_from_rfc3339(reminder_raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|_| RowDecodeError::Timestamp(reminder_raw.to_owned()))?,
            )
        };

        let attendance_confirmed = match cell(LedgerField::AttendanceConfirmed)
            .to_ascii_lowercase()
            .as_str()
        {
            "" => None,
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            other => return Err(RowDecodeError::Flag(other.to_owned())),
        };

        Ok(Self {
            holder_id,
            name: cell(LedgerField::Name).to_owned(),
            phone: cell(LedgerField::Phone).to_owned(),
            slot: Slot::new(day, time),
            status,
            reminder_sent_at,
            attendance_confirmed,
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RowDecodeError {
    #[error("invalid holder id `{0}`")]
    HolderId(String),
    #[error("invalid day `{0}`")]
    Day(String),
    #[error("invalid time `{0}`")]
    Time(String),
    #[error("invalid status `{0}`")]
    Status(String),
    #[error("invalid reminder timestamp `{0}`")]
    Timestamp(String),
    #[error("invalid attendance flag `{0}`")]
    Flag(String),
}

/// Ledger columns, in table order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerField {
    HolderId,
    Name,
    Phone,
    Day,
    Time,
    Status,
    ReminderSentAt,
    AttendanceConfirmed,
}

impl LedgerField {
    pub const ALL: [LedgerField; 8] = [
        Self::HolderId,
        Self::Name,
        Self::Phone,
        Self::Day,
        Self::Time,
        Self::Status,
        Self::ReminderSentAt,
        Self::AttendanceConfirmed,
    ];

    pub fn column_index(self) -> usize {
        match self {
            Self::HolderId => 0,
            Self::Name => 1,
            Self::Phone => 2,
            Self::Day => 3,
            Self::Time => 4,
            Self::Status => 5,
            Self::ReminderSentAt => 6,
            Self::AttendanceConfirmed => 7,
        }
    }

    /// Spreadsheet column letter (A..H).
    pub fn column_letter(self) -> char {
        char::from(b'A' + self.column_index() as u8)
    }

    pub fn column_name(self) -> &'static str {
        match self {
            Self::HolderId => "holder_id",
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Day => "day",
            Self::Time => "time",
            Self::Status => "status",
            Self::ReminderSentAt => "reminder_sent_at",
            Self::AttendanceConfirmed => "attendance_confirmed",
        }
    }

    pub fn header_row() -> Vec<String> {
        Self::ALL.iter().map(|field| field.column_name().to_owned()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Day(NaiveDate),
    Time(NaiveTime),
    Status(ReservationStatus),
    Timestamp(DateTime<Utc>),
    Flag(bool),
    Empty,
}

impl FieldValue {
    pub fn to_cell(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Day(day) => day.format(DAY_FORMAT).to_string(),
            Self::Time(time) => time.format(TIME_FORMAT).to_string(),
            Self::Status(status) => status.as_str().to_owned(),
            Self::Timestamp(at) => at.to_rfc3339(),
            Self::Flag(true) => "TRUE".to_owned(),
            Self::Flag(false) => "FALSE".to_owned(),
            Self::Empty => String::new(),
        }
    }
}
