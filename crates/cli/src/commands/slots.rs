use chrono::NaiveDate;
use slotbook_core::config::{AppConfig, LoadOptions};
use slotbook_core::domain::slot::parse_day;
use slotbook_core::inventory::SlotInventory;
use slotbook_core::ledger::LedgerClient;
use slotbook_db::open_ledger;

use super::{current_thread_runtime, CommandResult};

const TIMES_PER_LINE: usize = 8;

pub fn run(day: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure("slots", "config", error.to_string(), 2),
    };
    let calendar = match config.event.calendar() {
        Ok(calendar) => calendar,
        Err(error) => return CommandResult::failure("slots", "config", error.to_string(), 2),
    };

    let days = match day {
        Some(token) => match parse_day(token).and_then(|day| calendar.resolve_day(day)) {
            Ok(day) => vec![day],
            Err(error) => return CommandResult::failure("slots", "validation", error.to_string(), 2),
        },
        None => calendar.days().to_vec(),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(message) => return CommandResult::failure("slots", "runtime", message, 1),
    };
    let records = runtime.block_on(async {
        let ledger = open_ledger(&config.ledger).await.map_err(|error| error.to_string())?;
        ledger.read_all().await.map_err(|error| error.to_string())
    });
    let records = match records {
        Ok(records) => records,
        Err(message) => return CommandResult::failure("slots", "ledger", message, 4),
    };

    let inventory = SlotInventory::new(calendar);
    inventory.refresh(&records);
    CommandResult::text(render(&inventory, &days))
}

fn render(inventory: &SlotInventory, days: &[NaiveDate]) -> String {
    let mut lines = Vec::new();
    for day in days {
        let total = inventory.calendar().slots_for(*day).len();
        let free = inventory.free_slots(*day, usize::MAX);
        lines.push(format!("{} ({}): free {} of {}", day, day.format("%A"), free.len(), total));

        if free.is_empty() {
            lines.push("  fully booked".to_string());
            continue;
        }
        for chunk in free.chunks(TIMES_PER_LINE) {
            let times = chunk.iter().map(|slot| slot.time_token()).collect::<Vec<_>>();
            lines.push(format!("  {}", times.join(" ")));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use slotbook_core::domain::{HolderId, LedgerPosition, Reservation, Slot, SlotCalendar};
    use slotbook_core::inventory::SlotInventory;
    use slotbook_core::ledger::LedgerRecord;

    use super::render;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 12).expect("date")
    }

    fn short_calendar() -> SlotCalendar {
        SlotCalendar::new(
            vec![day()],
            NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(11, 30, 0).expect("time"),
        )
        .expect("calendar")
    }

    fn booked_at(row: u32, hour: u32, minute: u32) -> LedgerRecord {
        LedgerRecord {
            position: LedgerPosition(row),
            reservation: Reservation::booked(
                HolderId(i64::from(row)),
                "Guest",
                "79990000000",
                Slot::new(day(), NaiveTime::from_hms_opt(hour, minute, 0).expect("time")),
            ),
        }
    }

    #[test]
    fn lists_only_free_times_with_a_day_summary() {
        let inventory = SlotInventory::new(short_calendar());
        inventory.refresh(&[booked_at(2, 10, 30)]);

        let output = render(&inventory, &[day()]);

        assert_eq!(output, "2026-02-12 (Thursday): free 2 of 3\n  10:00 11:00");
    }

    #[test]
    fn a_day_without_free_slots_says_so() {
        let inventory = SlotInventory::new(short_calendar());
        inventory.refresh(&[booked_at(2, 10, 0), booked_at(3, 10, 30), booked_at(4, 11, 0)]);

        let output = render(&inventory, &[day()]);

        assert!(output.starts_with("2026-02-12 (Thursday): free 0 of 3"));
        assert!(output.ends_with("fully booked"));
    }

    #[test]
    fn long_days_wrap_free_times() {
        let inventory = SlotInventory::new(SlotCalendar::default());
        inventory.refresh(&[]);

        let output = render(&inventory, &[day()]);
        let lines = output.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "2026-02-12 (Thursday): free 20 of 20");
        assert_eq!(lines[1], "  10:00 10:30 11:00 11:30 12:00 12:30 13:00 13:30");
        assert_eq!(lines.len(), 4);
    }
}
