//! Long-polling ingress. Updates are handled one at a time, in arrival order, so a holder's
//! button press and the text that follows it are never processed out of order.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    api::{ApiError, BotApi},
    blocks::error_message,
    events::{EventContext, EventDispatcher, HandlerResult, TelegramEnvelope, TelegramEvent},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport reply failed: {0}")]
    Respond(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `None` means the stream has ended for good.
    async fn next_update(&self) -> Result<Option<TelegramEnvelope>, TransportError>;
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn respond(
        &self,
        envelope: &TelegramEnvelope,
        result: &HandlerResult,
    ) -> Result<(), TransportError>;
}

#[derive(Default)]
struct PollState {
    offset: i64,
    buffered: VecDeque<TelegramEnvelope>,
}

/// Transport over `getUpdates`. Acknowledging an update advances the offset, which the
/// Bot API treats as confirmation on the next poll.
pub struct BotApiTransport {
    api: Arc<dyn BotApi>,
    poll_timeout_secs: u64,
    state: Mutex<PollState>,
}

impl BotApiTransport {
    pub fn new(api: Arc<dyn BotApi>, poll_timeout_secs: u64) -> Self {
        Self { api, poll_timeout_secs, state: Mutex::new(PollState::default()) }
    }

    async fn poll(&self, timeout_secs: u64) -> Result<usize, ApiError> {
        let offset = self.state.lock().await.offset;
        let updates = self.api.get_updates(offset, timeout_secs).await?;
        let received = updates.len();

        let mut state = self.state.lock().await;
        let offset = state.offset;
        state.buffered.extend(
            updates
                .into_iter()
                .filter(|update| update.update_id >= offset)
                .map(TelegramEnvelope::from_update),
        );
        Ok(received)
    }

    async fn respond_to_callback(
        &self,
        envelope: &TelegramEnvelope,
        result: &HandlerResult,
    ) -> Result<(), ApiError> {
        let TelegramEvent::Callback(event) = &envelope.event else {
            return Ok(());
        };

        match result {
            HandlerResult::Responded(message) => {
                match event.message_id {
                    Some(message_id) => {
                        self.api.edit_message_text(event.chat_id, message_id, message).await?
                    }
                    None => self.api.send_message(event.chat_id, message).await?,
                }
                self.api.answer_callback_query(&event.callback_id, None, false).await
            }
            HandlerResult::Alert(text) => {
                self.api.answer_callback_query(&event.callback_id, Some(text), true).await
            }
            HandlerResult::Processed | HandlerResult::Ignored => {
                self.api.answer_callback_query(&event.callback_id, None, false).await
            }
        }
    }
}

#[async_trait]
impl UpdateTransport for BotApiTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.poll(0).await.map(|_| ()).map_err(|error| TransportError::Connect(error.to_string()))
    }

    async fn next_update(&self) -> Result<Option<TelegramEnvelope>, TransportError> {
        loop {
            if let Some(envelope) = self.state.lock().await.buffered.pop_front() {
                return Ok(Some(envelope));
            }
            let received = self
                .poll(self.poll_timeout_secs)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            debug!(event_name = "ingress.telegram.polled", received);
        }
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.offset = state.offset.max(update_id + 1);
        Ok(())
    }

    async fn respond(
        &self,
        envelope: &TelegramEnvelope,
        result: &HandlerResult,
    ) -> Result<(), TransportError> {
        let outcome = match (&envelope.event, result) {
            (TelegramEvent::Callback(_), _) => self.respond_to_callback(envelope, result).await,
            (event, HandlerResult::Responded(message)) => match event.chat_id() {
                Some(chat_id) => self.api.send_message(chat_id, message).await,
                None => Ok(()),
            },
            (event, HandlerResult::Alert(text)) => match event.chat_id() {
                Some(chat_id) => self.api.send_message(chat_id, &error_message(text)).await,
                None => Ok(()),
            },
            (_, HandlerResult::Processed | HandlerResult::Ignored) => Ok(()),
        };
        outcome.map_err(|error| TransportError::Respond(error.to_string()))
    }
}

enum PumpExit {
    Shutdown,
    StreamClosed,
}

pub struct PollingRunner {
    transport: Arc<dyn UpdateTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs until shutdown, the stream closing, or retries running out. Retries count
    /// consecutive failures only: a connection that delivered updates resets the budget.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut attempt = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let mut delivered = 0_usize;
            match self.connect_and_pump(attempt, &mut shutdown, &mut delivered).await {
                Ok(PumpExit::Shutdown) => {
                    info!(event_name = "ingress.telegram.stopped", "polling stopped on shutdown");
                    return Ok(());
                }
                Ok(PumpExit::StreamClosed) => {
                    info!(event_name = "ingress.telegram.closed", "update stream closed");
                    return Ok(());
                }
                Err(transport_error) => {
                    if delivered > 0 {
                        attempt = 0;
                    }
                    warn!(
                        event_name = "ingress.telegram.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "telegram transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "telegram retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        shutdown: &mut watch::Receiver<bool>,
        delivered: &mut usize,
    ) -> Result<PumpExit, TransportError> {
        info!(attempt, "opening telegram polling connection");
        self.transport.connect().await?;
        info!(attempt, "telegram polling connected");

        loop {
            // only the wait for the next update is cancelled; a dispatch always runs to the end
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(PumpExit::Shutdown),
                next = self.transport.next_update() => next?,
            };
            let Some(envelope) = next else {
                return Ok(PumpExit::StreamClosed);
            };
            *delivered += 1;

            let context = EventContext::for_update(envelope.update_id);
            let holder_id = envelope.event.holder_id().map_or(0, |holder| holder.0);
            info!(
                event_name = "ingress.telegram.update_received",
                update_id = envelope.update_id,
                event_kind = ?envelope.event.kind(),
                correlation_id = %context.correlation_id,
                holder_id,
                "received telegram update"
            );

            if let Err(error) = self.transport.acknowledge(envelope.update_id).await {
                warn!(
                    event_name = "ingress.telegram.ack_failed",
                    update_id = envelope.update_id,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "failed to acknowledge telegram update"
                );
            }

            let result = match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(result) => result,
                Err(error) => {
                    warn!(
                        event_name = "ingress.telegram.dispatch_failed",
                        update_id = envelope.update_id,
                        correlation_id = %context.correlation_id,
                        holder_id,
                        error = %error,
                        "event dispatch failed; continuing polling loop"
                    );
                    error.fallback_result()
                }
            };

            if let Err(error) = self.transport.respond(&envelope, &result).await {
                warn!(
                    event_name = "ingress.telegram.reply_failed",
                    update_id = envelope.update_id,
                    correlation_id = %context.correlation_id,
                    holder_id,
                    error = %error,
                    "failed to deliver reply; continuing polling loop"
                );
            }
        }
    }
}
