use serde::{Deserialize, Serialize};

/// Conversation states of the booking flow. `Done` is terminal for one booking but
/// re-enterable: a new start or a manage action leaves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Idle,
    ChoosingDay,
    ChoosingTime,
    EnteringName,
    EnteringPhone,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlowMode {
    #[default]
    New,
    Change,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StartRequested,
    ExistingReservationFound,
    ChangeRequested,
    DaySelected,
    DayFull,
    BackToDays,
    SlotAvailable,
    SlotTaken,
    NameAccepted,
    NameRejected,
    PhoneRejected,
    BookingCommitted,
    BookingConflict,
    ReservationCancelled,
    AbortRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub mode: FlowMode,
    pub missing_required_fields: Vec<String>,
}

impl FlowContext {
    pub fn new(mode: FlowMode) -> Self {
        Self { mode, missing_required_fields: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    OfferManageOptions,
    PromptDay,
    RefreshInventory,
    ListFreeSlots,
    ReofferSlots,
    PromptName,
    RepromptName,
    PromptPhone,
    RepromptPhone,
    AppendReservation,
    UpdateReservation,
    DeleteReservation,
    SurfaceConflict,
    DiscardDraft,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
