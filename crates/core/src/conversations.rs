//! Per-holder conversation state with an idle timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::domain::{HolderId, Reservation, Slot};
use crate::flows::{FlowContext, FlowMode, FlowState};
use crate::ledger::LedgerRecord;

/// The reservation being changed, as it looked when the change started. The position is a
/// hint only; the record is re-resolved before it is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeContext {
    pub record: LedgerRecord,
}

impl ChangeContext {
    pub fn previous(&self) -> &Reservation {
        &self.record.reservation
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ConversationMode {
    #[default]
    New,
    Change(ChangeContext),
}

impl ConversationMode {
    pub fn flow_mode(&self) -> FlowMode {
        match self {
            Self::New => FlowMode::New,
            Self::Change(_) => FlowMode::Change,
        }
    }

    pub fn changing_from(&self) -> Option<Slot> {
        match self {
            Self::New => None,
            Self::Change(change) => Some(change.previous().slot),
        }
    }
}

/// Fields collected so far. Nothing here reaches the ledger before the final step.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Draft {
    pub day: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub state: FlowState,
    pub mode: ConversationMode,
    pub draft: Draft,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            state: FlowState::Idle,
            mode: ConversationMode::New,
            draft: Draft::default(),
            last_activity: now,
        }
    }

    pub fn flow_context(&self) -> FlowContext {
        let mut context = FlowContext::new(self.mode.flow_mode());
        if self.draft.slot.is_none() {
            context.missing_required_fields.push("slot".to_owned());
        }
        if self.draft.name.is_none() {
            context.missing_required_fields.push("name".to_owned());
        }
        context
    }

    /// Back to `Idle` with the draft and any change context dropped.
    pub fn reset(&mut self) {
        self.state = FlowState::Idle;
        self.mode = ConversationMode::New;
        self.draft = Draft::default();
    }
}

type TurnLocks = HashMap<HolderId, Arc<tokio::sync::Mutex<()>>>;

pub struct ConversationStore {
    conversations: Mutex<HashMap<HolderId, Conversation>>,
    turns: Mutex<TurnLocks>,
    idle_timeout: Duration,
}

impl ConversationStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Serializes one holder's events: hold the guard from `load` through `save`. Events of
    /// different holders never wait on each other.
    pub async fn begin_turn(&self, holder_id: HolderId) -> OwnedMutexGuard<()> {
        let turn = relock(&self.turns).entry(holder_id).or_default().clone();
        turn.lock_owned().await
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Current conversation for a holder. An expired conversation comes back as `Idle`.
    pub fn load(&self, holder_id: HolderId, now: DateTime<Utc>) -> Conversation {
        let mut conversations = self.lock();
        match conversations.get(&holder_id) {
            Some(conversation) if !self.is_expired(conversation, now) => conversation.clone(),
            Some(_) => {
                conversations.remove(&holder_id);
                tracing::debug!(
                    event_name = "booking.conversation.expired",
                    holder_id = holder_id.0,
                    "conversation idle timeout elapsed"
                );
                Conversation::idle(now)
            }
            None => Conversation::idle(now),
        }
    }

    pub fn save(&self, holder_id: HolderId, mut conversation: Conversation, now: DateTime<Utc>) {
        conversation.last_activity = now;
        let mut conversations = self.lock();
        if conversation.state == FlowState::Idle && conversation.mode == ConversationMode::New {
            conversations.remove(&holder_id);
        } else {
            conversations.insert(holder_id, conversation);
        }
    }

    pub fn discard(&self, holder_id: HolderId) {
        self.lock().remove(&holder_id);
    }

    /// Drops every conversation idle past the timeout. Returns how many were dropped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut conversations = self.lock();
        let before = conversations.len();
        conversations.retain(|_, conversation| !self.is_expired(conversation, now));
        // A lock nobody holds or waits on is only referenced by the map.
        relock(&self.turns).retain(|_, turn| Arc::strong_count(turn) > 1);
        before - conversations.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, conversation: &Conversation, now: DateTime<Utc>) -> bool {
        now - conversation.last_activity > self.idle_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HolderId, Conversation>> {
        relock(&self.conversations)
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
