use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use slotbook_core::domain::HolderId;
use thiserror::Error;

use crate::{
    api::RawUpdate,
    blocks::OutgoingMessage,
    commands::{ActionPayload, BotCommand, PayloadParseError},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramEnvelope {
    pub update_id: i64,
    pub event: TelegramEvent,
}

impl TelegramEnvelope {
    /// Classifies a raw update. Updates without a sender (channel posts, service messages)
    /// cannot be attributed to a holder and are left unsupported.
    pub fn from_update(update: RawUpdate) -> Self {
        let update_id = update.update_id;
        let event = if let Some(query) = update.callback_query {
            let message = query.message.as_ref();
            TelegramEvent::Callback(CallbackEvent {
                callback_id: query.id,
                chat_id: message.map_or(query.from.id, |message| message.chat.id),
                message_id: message.map(|message| message.message_id),
                holder_id: HolderId(query.from.id),
                data: query.data.unwrap_or_default(),
            })
        } else if let Some(message) = update.message {
            match (message.from, message.text) {
                (Some(from), Some(text)) => match BotCommand::parse(&text) {
                    Some(command) => TelegramEvent::Command(CommandMessage {
                        chat_id: message.chat.id,
                        holder_id: HolderId(from.id),
                        command,
                    }),
                    None => TelegramEvent::Text(TextMessage {
                        chat_id: message.chat.id,
                        holder_id: HolderId(from.id),
                        text,
                    }),
                },
                (None, _) => TelegramEvent::Unsupported { kind: "anonymous_message".to_owned() },
                (Some(_), None) => TelegramEvent::Unsupported { kind: "non_text_message".to_owned() },
            }
        } else {
            TelegramEvent::Unsupported { kind: "other_update".to_owned() }
        };

        Self { update_id, event }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelegramEvent {
    Command(CommandMessage),
    Text(TextMessage),
    Callback(CallbackEvent),
    Unsupported { kind: String },
}

impl TelegramEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Command(_) => EventKind::Command,
            Self::Text(_) => EventKind::Text,
            Self::Callback(_) => EventKind::Callback,
            Self::Unsupported { .. } => EventKind::Unsupported,
        }
    }

    pub fn holder_id(&self) -> Option<HolderId> {
        match self {
            Self::Command(message) => Some(message.holder_id),
            Self::Text(message) => Some(message.holder_id),
            Self::Callback(event) => Some(event.holder_id),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Command(message) => Some(message.chat_id),
            Self::Text(message) => Some(message.chat_id),
            Self::Callback(event) => Some(event.chat_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Command,
    Text,
    Callback,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandMessage {
    pub chat_id: i64,
    pub holder_id: HolderId,
    pub command: BotCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessage {
    pub chat_id: i64,
    pub holder_id: HolderId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    pub callback_id: String,
    pub chat_id: i64,
    /// The message carrying the pressed button; answers edit it in place.
    pub message_id: Option<i64>,
    pub holder_id: HolderId,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_update(update_id: i64) -> Self {
        Self { correlation_id: format!("tg-{update_id}") }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutgoingMessage),
    /// Short notice; shown as a popup for button presses.
    Alert(String),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Payload(#[from] PayloadParseError),
}

impl EventHandlerError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Payload(_) => "That button is no longer active. Send /start to begin again.",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

impl DispatchError {
    /// What the sender sees when dispatch fails.
    pub fn fallback_result(&self) -> HandlerResult {
        match self {
            Self::Handler(error) => HandlerResult::Alert(error.user_message().to_owned()),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_kind(&self) -> EventKind;
    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_kind(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.kind()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Registers the command, text and callback handlers over one service.
pub fn bot_dispatcher<S>(service: Arc<S>) -> EventDispatcher
where
    S: CommandService + TextMessageService + CallbackService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(service.clone()));
    dispatcher.register(TextMessageHandler::new(service.clone()));
    dispatcher.register(CallbackHandler::new(service));
    dispatcher
}

#[async_trait]
pub trait CommandService: Send + Sync {
    async fn handle_command(
        &self,
        message: &CommandMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError>;
}

#[async_trait]
impl<S> CommandService for Arc<S>
where
    S: CommandService + ?Sized,
{
    async fn handle_command(
        &self,
        message: &CommandMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
        (**self).handle_command(message, ctx).await
    }
}

pub struct CommandHandler<S> {
    service: S,
}

impl<S> CommandHandler<S>
where
    S: CommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for CommandHandler<S>
where
    S: CommandService + 'static,
{
    fn event_kind(&self) -> EventKind {
        EventKind::Command
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Command(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let reply = self.service.handle_command(message, ctx).await?;
        Ok(reply.map_or(HandlerResult::Processed, HandlerResult::Responded))
    }
}

#[async_trait]
pub trait TextMessageService: Send + Sync {
    async fn handle_text(
        &self,
        message: &TextMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError>;
}

#[async_trait]
impl<S> TextMessageService for Arc<S>
where
    S: TextMessageService + ?Sized,
{
    async fn handle_text(
        &self,
        message: &TextMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
        (**self).handle_text(message, ctx).await
    }
}

pub struct TextMessageHandler<S> {
    service: S,
}

impl<S> TextMessageHandler<S>
where
    S: TextMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for TextMessageHandler<S>
where
    S: TextMessageService + 'static,
{
    fn event_kind(&self) -> EventKind {
        EventKind::Text
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Text(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let reply = self.service.handle_text(message, ctx).await?;
        Ok(reply.map_or(HandlerResult::Processed, HandlerResult::Responded))
    }
}

#[async_trait]
pub trait CallbackService: Send + Sync {
    async fn handle_callback(
        &self,
        event: &CallbackEvent,
        payload: ActionPayload,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[async_trait]
impl<S> CallbackService for Arc<S>
where
    S: CallbackService + ?Sized,
{
    async fn handle_callback(
        &self,
        event: &CallbackEvent,
        payload: ActionPayload,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        (**self).handle_callback(event, payload, ctx).await
    }
}

pub struct CallbackHandler<S> {
    service: S,
}

impl<S> CallbackHandler<S>
where
    S: CallbackService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for CallbackHandler<S>
where
    S: CallbackService + 'static,
{
    fn event_kind(&self) -> EventKind {
        EventKind::Callback
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Callback(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let payload = ActionPayload::parse(&event.data)?;
        self.service.handle_callback(event, payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use slotbook_core::domain::HolderId;

    use super::{
        bot_dispatcher, CallbackEvent, CallbackService, CommandMessage, CommandService,
        DispatchError, EventContext, EventDispatcher, EventHandlerError, EventKind, HandlerResult,
        TelegramEnvelope, TelegramEvent, TextMessage, TextMessageService,
    };
    use crate::api::RawUpdate;
    use crate::blocks::{MessageBuilder, OutgoingMessage};
    use crate::commands::{ActionPayload, BotCommand};

    #[derive(Default)]
    struct EchoService {
        seen: Mutex<Vec<String>>,
    }

    impl EchoService {
        fn record(&self, entry: String) {
            self.seen.lock().expect("lock").push(entry);
        }
    }

    #[async_trait]
    impl CommandService for EchoService {
        async fn handle_command(
            &self,
            message: &CommandMessage,
            ctx: &EventContext,
        ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
            self.record(format!("{}:{}", ctx.correlation_id, message.command.name()));
            Ok(Some(MessageBuilder::new(message.command.name()).build()))
        }
    }

    #[async_trait]
    impl TextMessageService for EchoService {
        async fn handle_text(
            &self,
            message: &TextMessage,
            _ctx: &EventContext,
        ) -> Result<Option<OutgoingMessage>, EventHandlerError> {
            self.record(format!("text:{}", message.text));
            Ok(None)
        }
    }

    #[async_trait]
    impl CallbackService for EchoService {
        async fn handle_callback(
            &self,
            _event: &CallbackEvent,
            payload: ActionPayload,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.record(format!("callback:{}", payload.encode()));
            Ok(HandlerResult::Alert("ok".to_owned()))
        }
    }

    fn envelope(raw: serde_json::Value) -> TelegramEnvelope {
        let update: RawUpdate = serde_json::from_value(raw).expect("update");
        TelegramEnvelope::from_update(update)
    }

    fn callback(data: &str) -> TelegramEnvelope {
        envelope(json!({
            "update_id": 7,
            "callback_query": {
                "id": "cb-7",
                "from": { "id": 501 },
                "message": { "message_id": 90, "chat": { "id": 501 } },
                "data": data
            }
        }))
    }

    #[test]
    fn updates_are_classified_by_shape() {
        let command = envelope(json!({
            "update_id": 1,
            "message": { "message_id": 1, "from": { "id": 501 }, "chat": { "id": 501 }, "text": "/start" }
        }));
        assert_eq!(
            command.event,
            TelegramEvent::Command(CommandMessage {
                chat_id: 501,
                holder_id: HolderId(501),
                command: BotCommand::Start,
            })
        );

        let text = envelope(json!({
            "update_id": 2,
            "message": { "message_id": 2, "from": { "id": 501 }, "chat": { "id": 501 }, "text": "Ana" }
        }));
        assert_eq!(text.event.kind(), EventKind::Text);

        let sticker = envelope(json!({
            "update_id": 3,
            "message": { "message_id": 3, "from": { "id": 501 }, "chat": { "id": 501 } }
        }));
        assert_eq!(sticker.event.kind(), EventKind::Unsupported);

        let pressed = callback("back");
        let TelegramEvent::Callback(event) = &pressed.event else {
            panic!("expected a callback");
        };
        assert_eq!(event.message_id, Some(90));
        assert_eq!(pressed.event.holder_id(), Some(HolderId(501)));
    }

    #[tokio::test]
    async fn dispatcher_routes_each_kind_to_its_handler() {
        let service = Arc::new(EchoService::default());
        let dispatcher = bot_dispatcher(service.clone());
        assert_eq!(dispatcher.handler_count(), 3);

        let command = envelope(json!({
            "update_id": 5,
            "message": { "message_id": 1, "from": { "id": 501 }, "chat": { "id": 501 }, "text": "/help" }
        }));
        let result =
            dispatcher.dispatch(&command, &EventContext::for_update(5)).await.expect("dispatch");
        assert!(matches!(result, HandlerResult::Responded(message) if message.text == "help"));

        let result = dispatcher
            .dispatch(&callback("day_2026-02-12"), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Alert("ok".to_owned()));

        assert_eq!(
            *service.seen.lock().expect("lock"),
            vec!["tg-5:help".to_owned(), "callback:day_2026-02-12".to_owned()]
        );
    }

    #[tokio::test]
    async fn stale_callback_payloads_fail_dispatch_with_an_alert_fallback() {
        let dispatcher = bot_dispatcher(Arc::new(EchoService::default()));

        let error = dispatcher
            .dispatch(&callback("menu_open_v1"), &EventContext::default())
            .await
            .expect_err("unknown payload");
        assert!(matches!(error, DispatchError::Handler(EventHandlerError::Payload(_))));
        assert!(matches!(error.fallback_result(), HandlerResult::Alert(text) if text.contains("/start")));
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(&callback("back"), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
    }
}
