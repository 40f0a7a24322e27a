use thiserror::Error;

use crate::domain::{Reservation, Slot, SlotParseError};
use crate::flows::FlowTransitionError;
use crate::ledger::LedgerError;

/// Malformed user input. The conversation re-prompts and stays where it is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must have at least {min} characters")]
    NameTooShort { min: usize },
    #[error("phone must contain digits only")]
    PhoneNotNumeric,
    #[error("phone must have at least {min} digits")]
    PhoneTooShort { min: usize },
    #[error(transparent)]
    UnknownSlot(#[from] SlotParseError),
}

/// A slot or per-holder exclusivity rule would be broken by the requested write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("slot {slot} is already taken")]
    SlotTaken { slot: Slot },
    #[error("holder already has a reservation at {}", existing.slot)]
    HolderAlreadyBooked { existing: Box<Reservation> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("caller is not allowed to run privileged operations")]
    NotPrivileged,
    #[error("reservation belongs to a different holder")]
    NotReservationHolder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    Ledger,
    Authorization,
    NotFound,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error("no active reservation")]
    NotFound,
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl BookingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            // A stale button press is malformed input for the current state.
            Self::Validation(_) | Self::FlowTransition(_) => ErrorClass::Validation,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Ledger(_) => ErrorClass::Ledger,
            Self::Authorization(_) => ErrorClass::Authorization,
            Self::NotFound => ErrorClass::NotFound,
        }
    }

    /// Text safe to show the holder. Ledger details never leak past this point.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::NameTooShort { .. }) => {
                "The name is too short. Please enter at least 2 characters."
            }
            Self::Validation(
                ValidationError::PhoneNotNumeric | ValidationError::PhoneTooShort { .. },
            ) => "Please enter the phone number as digits only, at least 10 of them.",
            Self::Validation(ValidationError::UnknownSlot(SlotParseError::InvalidDay(_)))
            | Self::Validation(ValidationError::UnknownSlot(SlotParseError::UnknownDay(_))) => {
                "That day is not available."
            }
            Self::Validation(ValidationError::UnknownSlot(_)) => "That slot was not found.",
            Self::FlowTransition(_) => "That button is no longer active. Send /start to begin again.",
            Self::Conflict(ConflictError::SlotTaken { .. }) => {
                "Sorry, that slot has just been taken."
            }
            Self::Conflict(ConflictError::HolderAlreadyBooked { .. }) => {
                "You already have a reservation."
            }
            Self::Ledger(_) => "The booking service is temporarily unavailable. Please retry shortly.",
            Self::Authorization(AuthorizationError::NotPrivileged) => "Insufficient rights.",
            Self::Authorization(AuthorizationError::NotReservationHolder) => {
                "This is not your reservation."
            }
            Self::NotFound => "You have no active reservation.",
        }
    }
}
