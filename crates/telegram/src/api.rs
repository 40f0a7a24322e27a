//! Minimal Bot API surface: long polling, sending and editing messages, answering callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::blocks::OutgoingMessage;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub callback_query: Option<RawCallbackQuery>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<RawUser>,
    pub chat: RawChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawChat {
    pub id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawCallbackQuery {
    pub id: String,
    pub from: RawUser,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("bot api request failed: {0}")]
    Http(String),
    #[error("bot api rejected the call ({code}): {description}")]
    Api { code: u16, description: String },
    #[error("bot api response could not be decoded: {0}")]
    Decode(String),
}

impl ApiError {
    /// The holder blocked the bot or never opened a chat with it.
    pub fn is_unreachable_chat(&self) -> bool {
        match self {
            Self::Api { code: 403, .. } => true,
            Self::Api { code: 400, description } => description.contains("chat not found"),
            _ => false,
        }
    }

    /// Editing a message to identical content is reported as an error; it is harmless.
    pub fn is_message_not_modified(&self) -> bool {
        matches!(self, Self::Api { code: 400, description } if description.contains("message is not modified"))
    }
}

#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<RawUpdate>, ApiError>;
    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<(), ApiError>;
    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), ApiError>;
    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ApiError>;
}

#[async_trait]
impl<T> BotApi for Arc<T>
where
    T: BotApi + ?Sized,
{
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<RawUpdate>, ApiError> {
        (**self).get_updates(offset, timeout_secs).await
    }

    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<(), ApiError> {
        (**self).send_message(chat_id, message).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), ApiError> {
        (**self).edit_message_text(chat_id, message_id, message).await
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        (**self).answer_callback_query(callback_id, text, show_alert).await
    }
}

/// Builds the JSON body shared by `sendMessage` and `editMessageText`.
pub fn message_body(chat_id: i64, message_id: Option<i64>, message: &OutgoingMessage) -> Value {
    let mut body = json!({ "chat_id": chat_id, "text": message.text });
    if let Some(message_id) = message_id {
        body["message_id"] = json!(message_id);
    }
    if let Some(keyboard) = &message.keyboard {
        body["reply_markup"] = json!(keyboard);
    }
    body
}

pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl TelegramClient {
    /// `poll_timeout_secs` is the long-poll window; the HTTP timeout leaves headroom above it.
    pub fn new(
        base_url: impl Into<String>,
        token: SecretString,
        poll_timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()
            .map_err(|error| ApiError::Http(error.without_url().to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_owned(), token })
    }

    async fn call<T>(&self, method: &'static str, body: &Value) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token.expose_secret());
        // the token is part of the path, so transport errors drop the url before formatting
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| ApiError::Http(error.without_url().to_string()))?;
        let status = response.status();

        let payload: ApiResponse<T> = response
            .json()
            .await
            .map_err(|error| ApiError::Decode(error.without_url().to_string()))?;
        if payload.ok {
            debug!(event_name = "telegram.api.ok", method, status = status.as_u16());
            return payload
                .result
                .ok_or_else(|| ApiError::Decode(format!("{method}: missing result")));
        }

        let error = ApiError::Api {
            code: payload.error_code.unwrap_or(status.as_u16()),
            description: payload.description.unwrap_or_default(),
        };
        warn!(event_name = "telegram.api.rejected", method, error = %error, "bot api call rejected");
        Err(error)
    }
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<RawUpdate>, ApiError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<(), ApiError> {
        self.call::<IgnoredAny>("sendMessage", &message_body(chat_id, None, message)).await?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), ApiError> {
        match self
            .call::<IgnoredAny>("editMessageText", &message_body(chat_id, Some(message_id), message))
            .await
        {
            Err(error) if error.is_message_not_modified() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        let mut body = json!({ "callback_query_id": callback_id, "show_alert": show_alert });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<IgnoredAny>("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
