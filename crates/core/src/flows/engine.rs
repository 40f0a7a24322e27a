use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowMode, FlowState, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The booking conversation: pick a day, pick a time, leave a name and phone.
#[derive(Clone, Debug, Default)]
pub struct BookingFlow;

impl FlowDefinition for BookingFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::Idle
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_booking(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event))
                    .with_metadata("mode", format!("{:?}", context.mode)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: FlowState, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_booking(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AppendReservation, DeleteReservation, DiscardDraft, ListFreeSlots, OfferManageOptions,
        PromptDay, PromptName, PromptPhone, RefreshInventory, ReofferSlots, RepromptName,
        RepromptPhone, SurfaceConflict, UpdateReservation,
    };
    use FlowEvent::{
        AbortRequested, BackToDays, BookingCommitted, BookingConflict, ChangeRequested, DayFull,
        DaySelected, ExistingReservationFound, NameAccepted, NameRejected, PhoneRejected,
        ReservationCancelled, SlotAvailable, SlotTaken, StartRequested,
    };
    use FlowState::{ChoosingDay, ChoosingTime, Done, EnteringName, EnteringPhone, Idle};

    let (to, actions) = match (current, event) {
        (Idle | Done, StartRequested) => (ChoosingDay, vec![PromptDay]),
        (Idle | Done, ExistingReservationFound) => (Idle, vec![OfferManageOptions]),
        (Idle | Done, ChangeRequested) => (ChoosingDay, vec![PromptDay]),
        (Idle | Done, ReservationCancelled) => (Idle, vec![DeleteReservation]),
        (ChoosingDay | ChoosingTime, DaySelected) => {
            (ChoosingTime, vec![RefreshInventory, ListFreeSlots])
        }
        (ChoosingDay | ChoosingTime, DayFull) => (ChoosingDay, vec![PromptDay]),
        (ChoosingTime, BackToDays) => (ChoosingDay, vec![PromptDay]),
        (ChoosingTime, SlotAvailable) => match context.mode {
            FlowMode::New => (EnteringName, vec![PromptName]),
            FlowMode::Change => (Done, vec![UpdateReservation]),
        },
        (ChoosingTime, SlotTaken) => (ChoosingTime, vec![RefreshInventory, ReofferSlots]),
        (ChoosingTime | EnteringPhone, BookingConflict) => {
            (Idle, vec![SurfaceConflict, DiscardDraft])
        }
        (EnteringName, NameAccepted) => (EnteringPhone, vec![PromptPhone]),
        (EnteringName, NameRejected) => (EnteringName, vec![RepromptName]),
        (EnteringPhone, PhoneRejected) => (EnteringPhone, vec![RepromptPhone]),
        (EnteringPhone, BookingCommitted) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: *current,
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (Done, vec![AppendReservation])
        }
        (_, AbortRequested) => (Idle, vec![DiscardDraft]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}
