pub mod reservation;
pub mod slot;

pub use reservation::{
    FieldValue, HolderId, LedgerField, LedgerPosition, Reservation, ReservationStatus,
    RowDecodeError,
};
pub use slot::{CalendarError, Slot, SlotCalendar, SlotParseError};
