use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use slotbook_core::config::{AppConfig, LoadOptions, TRIGGER_AT_FORMAT};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_doc.as_ref(), config_file_path.as_deref())
}

fn render(config: &AppConfig, doc: Option<&Value>, path: Option<&Path>) -> String {
    let days = config
        .event
        .days
        .iter()
        .map(|day| day.format("%Y-%m-%d").to_string())
        .collect::<Vec<_>>()
        .join(",");
    let access_token = match &config.ledger.access_token {
        Some(token) if !token.expose_secret().trim().is_empty() => "<redacted>",
        _ => "<unset>",
    };
    let trigger_at = config
        .reminder
        .trigger_at
        .map(|at| at.format(TRIGGER_AT_FORMAT).to_string())
        .unwrap_or_else(|| "<unset>".to_string());
    let admin = config
        .reminder
        .admin_holder_id
        .map(|holder| holder.0.to_string())
        .unwrap_or_else(|| "<unset>".to_string());

    let entries: Vec<(&str, String, Option<&str>)> = vec![
        ("event.days", days, Some("SLOTBOOK_EVENT_DAYS")),
        ("event.opening", config.event.opening.format("%H:%M").to_string(), Some("SLOTBOOK_EVENT_OPENING")),
        ("event.closing", config.event.closing.format("%H:%M").to_string(), Some("SLOTBOOK_EVENT_CLOSING")),
        (
            "booking.idle_timeout_secs",
            config.booking.idle_timeout_secs.to_string(),
            Some("SLOTBOOK_BOOKING_IDLE_TIMEOUT_SECS"),
        ),
        (
            "booking.max_listed_slots",
            config.booking.max_listed_slots.to_string(),
            Some("SLOTBOOK_BOOKING_MAX_LISTED_SLOTS"),
        ),
        ("ledger.backend", format!("{:?}", config.ledger.backend), Some("SLOTBOOK_LEDGER_BACKEND")),
        ("ledger.timeout_secs", config.ledger.timeout_secs.to_string(), Some("SLOTBOOK_LEDGER_TIMEOUT_SECS")),
        (
            "ledger.spreadsheet_id",
            config.ledger.spreadsheet_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SLOTBOOK_LEDGER_SPREADSHEET_ID"),
        ),
        ("ledger.sheet_name", config.ledger.sheet_name.clone(), Some("SLOTBOOK_LEDGER_SHEET_NAME")),
        ("ledger.sheet_gid", config.ledger.sheet_gid.to_string(), Some("SLOTBOOK_LEDGER_SHEET_GID")),
        ("ledger.access_token", access_token.to_string(), Some("SLOTBOOK_LEDGER_ACCESS_TOKEN")),
        ("ledger.api_base_url", config.ledger.api_base_url.clone(), Some("SLOTBOOK_LEDGER_API_BASE_URL")),
        ("ledger.sqlite_url", config.ledger.sqlite_url.clone(), Some("SLOTBOOK_LEDGER_SQLITE_URL")),
        ("ledger.max_connections", config.ledger.max_connections.to_string(), None),
        (
            "telegram.bot_token",
            redact_token(config.telegram.bot_token.expose_secret()),
            Some("SLOTBOOK_TELEGRAM_BOT_TOKEN"),
        ),
        (
            "telegram.api_base_url",
            config.telegram.api_base_url.clone(),
            Some("SLOTBOOK_TELEGRAM_API_BASE_URL"),
        ),
        (
            "telegram.poll_timeout_secs",
            config.telegram.poll_timeout_secs.to_string(),
            Some("SLOTBOOK_TELEGRAM_POLL_TIMEOUT_SECS"),
        ),
        ("reminder.trigger_at", trigger_at, Some("SLOTBOOK_REMINDER_TRIGGER_AT")),
        ("reminder.timezone", config.reminder.timezone.name().to_string(), Some("SLOTBOOK_REMINDER_TIMEZONE")),
        ("reminder.tick_secs", config.reminder.tick_secs.to_string(), Some("SLOTBOOK_REMINDER_TICK_SECS")),
        ("reminder.admin_holder_id", admin, Some("SLOTBOOK_REMINDER_ADMIN_HOLDER_ID")),
        ("reminder.confirm_window_secs", config.reminder.confirm_window_secs.to_string(), None),
        (
            "reminder.max_delivery_attempts",
            config.reminder.max_delivery_attempts.to_string(),
            Some("SLOTBOOK_REMINDER_MAX_DELIVERY_ATTEMPTS"),
        ),
        ("server.bind_address", config.server.bind_address.clone(), Some("SLOTBOOK_SERVER_BIND_ADDRESS")),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            Some("SLOTBOOK_SERVER_HEALTH_CHECK_PORT"),
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            Some("SLOTBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("SLOTBOOK_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("SLOTBOOK_LOGGING_FORMAT")),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, value, env_key)| render_line(key, &value, field_source(key, env_key, doc, path))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("slotbook.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/slotbook.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the public bot id, hides the secret half.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}
