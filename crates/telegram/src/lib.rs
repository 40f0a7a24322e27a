//! Telegram Integration - long-polling bot interface
//!
//! This crate provides the chat interface for slotbook:
//! - **Polling** (`polling`) - `getUpdates` loop with reconnection logic (no public URL needed)
//! - **Bot API** (`api`) - the handful of Bot API calls the bot makes
//! - **Commands** (`commands`) - `/start`, `/cancel`, `/help`, `/remind` and button payloads
//! - **Events** (`events`) - update classification and handler dispatch
//! - **Keyboards** (`blocks`) - message and inline keyboard builders
//! - **Service** (`service`) - wiring from chat events to the booking workflows
//!
//! # Getting Started
//!
//! 1. Create a bot with @BotFather and copy its token
//! 2. Set `SLOTBOOK_TELEGRAM_BOT_TOKEN`
//! 3. Optionally set `SLOTBOOK_REMINDER_ADMIN_HOLDER_ID` to your Telegram user id
//!
//! # Architecture
//!
//! ```text
//! getUpdates → EventDispatcher → Handlers → BotService → Booking / Reminder / Admin
//!                    ↓
//!          sendMessage / editMessageText ← OutgoingMessage
//! ```
//!
//! # Key Types
//!
//! - `PollingRunner` - sequential update loop with reconnection logic
//! - `EventDispatcher` - routes updates to the appropriate handler
//! - `MessageBuilder` - constructs messages with inline keyboards
//! - `TelegramReminderNotifier` - delivers reminders to holders

pub mod api;
pub mod blocks;
pub mod commands;
pub mod events;
pub mod polling;
pub mod service;

pub use api::{ApiError, BotApi, TelegramClient};
pub use events::{bot_dispatcher, EventDispatcher};
pub use polling::{BotApiTransport, PollingRunner, ReconnectPolicy};
pub use service::{BotService, TelegramReminderNotifier};
