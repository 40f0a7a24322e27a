use std::fmt;

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SLOT_MINUTES: u32 = 30;
pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// One bookable (day, time-of-day) unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub day: NaiveDate,
    pub time: NaiveTime,
}

impl Slot {
    pub fn new(day: NaiveDate, time: NaiveTime) -> Self {
        Self { day, time }
    }

    pub fn day_token(&self) -> String {
        self.day.format(DAY_FORMAT).to_string()
    }

    pub fn time_token(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.day_token(), self.time_token())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotParseError {
    #[error("unrecognized day `{0}`")]
    InvalidDay(String),
    #[error("unrecognized time `{0}`")]
    InvalidTime(String),
    #[error("day `{0}` is not open for booking")]
    UnknownDay(NaiveDate),
    #[error("slot `{0}` is not part of the schedule")]
    UnknownSlot(Slot),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("at least one bookable day is required")]
    NoDays,
    #[error("opening time {opening} must be before closing time {closing}")]
    EmptyWindow { opening: NaiveTime, closing: NaiveTime },
    #[error("{0} is not aligned to the {SLOT_MINUTES}-minute grid")]
    Misaligned(NaiveTime),
}

pub fn parse_day(token: &str) -> Result<NaiveDate, SlotParseError> {
    NaiveDate::parse_from_str(token.trim(), DAY_FORMAT)
        .map_err(|_| SlotParseError::InvalidDay(token.to_owned()))
}

pub fn parse_time(token: &str) -> Result<NaiveTime, SlotParseError> {
    NaiveTime::parse_from_str(token.trim(), TIME_FORMAT)
        .map_err(|_| SlotParseError::InvalidTime(token.to_owned()))
}

fn is_aligned(time: NaiveTime) -> bool {
    time.second() == 0 && time.nanosecond() == 0 && time.minute() % SLOT_MINUTES == 0
}

/// The fixed inventory: a handful of days, each cut into half-hour slots between
/// `opening` (inclusive) and `closing` (exclusive).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotCalendar {
    days: Vec<NaiveDate>,
    opening: NaiveTime,
    closing: NaiveTime,
}

impl SlotCalendar {
    pub fn new(
        mut days: Vec<NaiveDate>,
        opening: NaiveTime,
        closing: NaiveTime,
    ) -> Result<Self, CalendarError> {
        days.sort();
        days.dedup();
        if days.is_empty() {
            return Err(CalendarError::NoDays);
        }
        if opening >= closing {
            return Err(CalendarError::EmptyWindow { opening, closing });
        }
        for time in [opening, closing] {
            if !is_aligned(time) {
                return Err(CalendarError::Misaligned(time));
            }
        }
        Ok(Self { days, opening, closing })
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn opening(&self) -> NaiveTime {
        self.opening
    }

    pub fn closing(&self) -> NaiveTime {
        self.closing
    }

    pub fn times(&self) -> Vec<NaiveTime> {
        let step = Duration::minutes(i64::from(SLOT_MINUTES));
        let mut times = Vec::new();
        let mut cursor = self.opening;
        while cursor < self.closing {
            times.push(cursor);
            let (next, wrapped) = cursor.overflowing_add_signed(step);
            if wrapped != 0 {
                break;
            }
            cursor = next;
        }
        times
    }

    pub fn slots_for(&self, day: NaiveDate) -> Vec<Slot> {
        if !self.has_day(day) {
            return Vec::new();
        }
        self.times().into_iter().map(|time| Slot::new(day, time)).collect()
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.days.iter().flat_map(|day| self.slots_for(*day)).collect()
    }

    pub fn has_day(&self, day: NaiveDate) -> bool {
        self.days.binary_search(&day).is_ok()
    }

    pub fn contains(&self, slot: &Slot) -> bool {
        self.has_day(slot.day)
            && slot.time >= self.opening
            && slot.time < self.closing
            && is_aligned(slot.time)
    }

    pub fn resolve_day(&self, day: NaiveDate) -> Result<NaiveDate, SlotParseError> {
        if self.has_day(day) {
            Ok(day)
        } else {
            Err(SlotParseError::UnknownDay(day))
        }
    }

    pub fn resolve_slot(&self, slot: Slot) -> Result<Slot, SlotParseError> {
        self.resolve_day(slot.day)?;
        if self.contains(&slot) {
            Ok(slot)
        } else {
            Err(SlotParseError::UnknownSlot(slot))
        }
    }
}

impl Default for SlotCalendar {
    fn default() -> Self {
        let days = [12, 13]
            .into_iter()
            .filter_map(|day| NaiveDate::from_ymd_opt(2026, 2, day))
            .collect::<Vec<_>>();
        let opening = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default();
        let closing = NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default();
        Self { days, opening, closing }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{parse_day, parse_time, CalendarError, Slot, SlotCalendar, SlotParseError};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).expect("valid date")
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn default_calendar_has_two_days_of_twenty_slots() {
        let calendar = SlotCalendar::default();

        assert_eq!(calendar.days(), &[day(12), day(13)]);
        assert_eq!(calendar.times().len(), 20);
        assert_eq!(calendar.slots().len(), 40);
        assert_eq!(calendar.times().first(), Some(&time(10, 0)));
        assert_eq!(calendar.times().last(), Some(&time(19, 30)));
    }

    #[test]
    fn contains_rejects_closing_time_and_off_grid_times() {
        let calendar = SlotCalendar::default();

        assert!(calendar.contains(&Slot::new(day(12), time(19, 30))));
        assert!(!calendar.contains(&Slot::new(day(12), time(20, 0))));
        assert!(!calendar.contains(&Slot::new(day(12), time(10, 15))));
        assert!(!calendar.contains(&Slot::new(day(14), time(10, 0))));
    }

    #[test]
    fn resolve_slot_reports_unknown_day_before_unknown_time() {
        let calendar = SlotCalendar::default();

        assert_eq!(
            calendar.resolve_slot(Slot::new(day(20), time(10, 0))),
            Err(SlotParseError::UnknownDay(day(20)))
        );
        assert_eq!(
            calendar.resolve_slot(Slot::new(day(12), time(21, 0))),
            Err(SlotParseError::UnknownSlot(Slot::new(day(12), time(21, 0))))
        );
    }

    #[test]
    fn new_calendar_validates_window() {
        assert_eq!(
            SlotCalendar::new(vec![], time(10, 0), time(12, 0)),
            Err(CalendarError::NoDays)
        );
        assert!(matches!(
            SlotCalendar::new(vec![day(12)], time(12, 0), time(10, 0)),
            Err(CalendarError::EmptyWindow { .. })
        ));
        assert_eq!(
            SlotCalendar::new(vec![day(12)], time(10, 10), time(12, 0)),
            Err(CalendarError::Misaligned(time(10, 10)))
        );
    }

    #[test]
    fn tokens_round_trip_through_display() {
        let slot = Slot::new(parse_day("2026-02-12").expect("day"), parse_time("10:00").expect("time"));
        assert_eq!(slot.to_string(), "2026-02-12 10:00");
        assert!(parse_day("12.02.2026").is_err());
        assert!(parse_time("25:00").is_err());
    }
}
