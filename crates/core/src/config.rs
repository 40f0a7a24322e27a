use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::slot::{parse_day, parse_time};
use crate::domain::{HolderId, SlotCalendar};
use crate::reminder::ReminderSchedule;

pub const TRIGGER_AT_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub event: EventConfig,
    pub booking: BookingConfig,
    pub ledger: LedgerConfig,
    pub telegram: TelegramConfig,
    pub reminder: ReminderConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct EventConfig {
    pub days: Vec<NaiveDate>,
    pub opening: NaiveTime,
    pub closing: NaiveTime,
}

#[derive(Clone, Debug)]
pub struct BookingConfig {
    pub idle_timeout_secs: u64,
    pub max_listed_slots: usize,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub timeout_secs: u64,
    pub spreadsheet_id: Option<String>,
    pub sheet_name: String,
    pub sheet_gid: u64,
    pub access_token: Option<SecretString>,
    pub api_base_url: String,
    pub sqlite_url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReminderConfig {
    pub trigger_at: Option<NaiveDateTime>,
    pub timezone: Tz,
    pub tick_secs: u64,
    pub admin_holder_id: Option<HolderId>,
    pub confirm_window_secs: u64,
    pub max_delivery_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    Sheets,
    Sqlite,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub ledger_backend: Option<LedgerBackend>,
    pub sqlite_url: Option<String>,
    pub log_level: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub admin_holder_id: Option<i64>,
    pub trigger_at: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let calendar = SlotCalendar::default();
        Self {
            event: EventConfig {
                days: calendar.days().to_vec(),
                opening: calendar.opening(),
                closing: calendar.closing(),
            },
            booking: BookingConfig { idle_timeout_secs: 1800, max_listed_slots: 40 },
            ledger: LedgerConfig {
                backend: LedgerBackend::Sheets,
                timeout_secs: 10,
                spreadsheet_id: None,
                sheet_name: "Sheet1".to_string(),
                sheet_gid: 0,
                access_token: None,
                api_base_url: "https://sheets.googleapis.com".to_string(),
                sqlite_url: "sqlite://slotbook.db".to_string(),
                max_connections: 5,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
            },
            reminder: ReminderConfig {
                trigger_at: None,
                timezone: chrono_tz::Europe::Moscow,
                tick_secs: 60,
                admin_holder_id: None,
                confirm_window_secs: 300,
                max_delivery_attempts: 3,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LedgerBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sheets" => Ok(Self::Sheets),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported ledger backend `{other}` (expected sheets|sqlite|memory)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl EventConfig {
    pub fn calendar(&self) -> Result<SlotCalendar, ConfigError> {
        SlotCalendar::new(self.days.clone(), self.opening, self.closing)
            .map_err(|error| ConfigError::Validation(format!("event: {error}")))
    }
}

impl BookingConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.idle_timeout_secs).unwrap_or(i64::MAX))
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ReminderConfig {
    /// `None` when no trigger instant is configured; the autonomous sweep is then disabled.
    pub fn schedule(&self) -> Result<Option<ReminderSchedule>, ConfigError> {
        self.trigger_at
            .map(|local| {
                ReminderSchedule::from_local(
                    local,
                    self.timezone,
                    Duration::from_secs(self.tick_secs),
                )
                .map_err(|error| ConfigError::Validation(format!("reminder: {error}")))
            })
            .transpose()
    }

    pub fn confirm_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.confirm_window_secs).unwrap_or(i64::MAX))
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("slotbook.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(event) = patch.event {
            if let Some(days) = event.days {
                self.event.days = days
                    .iter()
                    .map(|day| parse_day(day).map_err(|error| file_error("event.days", error)))
                    .collect::<Result<_, _>>()?;
            }
            if let Some(opening) = event.opening {
                self.event.opening =
                    parse_time(&opening).map_err(|error| file_error("event.opening", error))?;
            }
            if let Some(closing) = event.closing {
                self.event.closing =
                    parse_time(&closing).map_err(|error| file_error("event.closing", error))?;
            }
        }

        if let Some(booking) = patch.booking {
            if let Some(idle_timeout_secs) = booking.idle_timeout_secs {
                self.booking.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(max_listed_slots) = booking.max_listed_slots {
                self.booking.max_listed_slots = max_listed_slots;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(backend) = ledger.backend {
                self.ledger.backend = backend;
            }
            if let Some(timeout_secs) = ledger.timeout_secs {
                self.ledger.timeout_secs = timeout_secs;
            }
            if let Some(spreadsheet_id) = ledger.spreadsheet_id {
                self.ledger.spreadsheet_id = Some(spreadsheet_id);
            }
            if let Some(sheet_name) = ledger.sheet_name {
                self.ledger.sheet_name = sheet_name;
            }
            if let Some(sheet_gid) = ledger.sheet_gid {
                self.ledger.sheet_gid = sheet_gid;
            }
            if let Some(access_token_value) = ledger.access_token {
                self.ledger.access_token = Some(secret_value(access_token_value));
            }
            if let Some(api_base_url) = ledger.api_base_url {
                self.ledger.api_base_url = api_base_url;
            }
            if let Some(sqlite_url) = ledger.sqlite_url {
                self.ledger.sqlite_url = sqlite_url;
            }
            if let Some(max_connections) = ledger.max_connections {
                self.ledger.max_connections = max_connections;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token_value) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token_value);
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(reminder) = patch.reminder {
            if let Some(trigger_at) = reminder.trigger_at {
                self.reminder.trigger_at = Some(
                    parse_trigger_at(&trigger_at)
                        .map_err(|error| file_error("reminder.trigger_at", error))?,
                );
            }
            if let Some(timezone) = reminder.timezone {
                self.reminder.timezone =
                    parse_timezone(&timezone).map_err(|error| file_error("reminder.timezone", error))?;
            }
            if let Some(tick_secs) = reminder.tick_secs {
                self.reminder.tick_secs = tick_secs;
            }
            if let Some(admin_holder_id) = reminder.admin_holder_id {
                self.reminder.admin_holder_id = Some(HolderId(admin_holder_id));
            }
            if let Some(confirm_window_secs) = reminder.confirm_window_secs {
                self.reminder.confirm_window_secs = confirm_window_secs;
            }
            if let Some(max_delivery_attempts) = reminder.max_delivery_attempts {
                self.reminder.max_delivery_attempts = max_delivery_attempts;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SLOTBOOK_EVENT_DAYS") {
            self.event.days = value
                .split(',')
                .map(|day| parse_day(day).map_err(|_| invalid_env("SLOTBOOK_EVENT_DAYS", &value)))
                .collect::<Result<_, _>>()?;
        }
        if let Some(value) = read_env("SLOTBOOK_EVENT_OPENING") {
            self.event.opening =
                parse_time(&value).map_err(|_| invalid_env("SLOTBOOK_EVENT_OPENING", &value))?;
        }
        if let Some(value) = read_env("SLOTBOOK_EVENT_CLOSING") {
            self.event.closing =
                parse_time(&value).map_err(|_| invalid_env("SLOTBOOK_EVENT_CLOSING", &value))?;
        }

        if let Some(value) = read_env("SLOTBOOK_BOOKING_IDLE_TIMEOUT_SECS") {
            self.booking.idle_timeout_secs =
                parse_u64("SLOTBOOK_BOOKING_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTBOOK_BOOKING_MAX_LISTED_SLOTS") {
            self.booking.max_listed_slots =
                parse_usize("SLOTBOOK_BOOKING_MAX_LISTED_SLOTS", &value)?;
        }

        if let Some(value) = read_env("SLOTBOOK_LEDGER_BACKEND") {
            self.ledger.backend = value.parse()?;
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_TIMEOUT_SECS") {
            self.ledger.timeout_secs = parse_u64("SLOTBOOK_LEDGER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_SPREADSHEET_ID") {
            self.ledger.spreadsheet_id = Some(value);
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_SHEET_NAME") {
            self.ledger.sheet_name = value;
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_SHEET_GID") {
            self.ledger.sheet_gid = parse_u64("SLOTBOOK_LEDGER_SHEET_GID", &value)?;
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_ACCESS_TOKEN") {
            self.ledger.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_API_BASE_URL") {
            self.ledger.api_base_url = value;
        }
        if let Some(value) = read_env("SLOTBOOK_LEDGER_SQLITE_URL") {
            self.ledger.sqlite_url = value;
        }

        if let Some(value) = read_env("SLOTBOOK_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("SLOTBOOK_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("SLOTBOOK_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_u64("SLOTBOOK_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SLOTBOOK_REMINDER_TRIGGER_AT") {
            self.reminder.trigger_at = Some(
                parse_trigger_at(&value)
                    .map_err(|_| invalid_env("SLOTBOOK_REMINDER_TRIGGER_AT", &value))?,
            );
        }
        if let Some(value) = read_env("SLOTBOOK_REMINDER_TIMEZONE") {
            self.reminder.timezone = parse_timezone(&value)
                .map_err(|_| invalid_env("SLOTBOOK_REMINDER_TIMEZONE", &value))?;
        }
        if let Some(value) = read_env("SLOTBOOK_REMINDER_TICK_SECS") {
            self.reminder.tick_secs = parse_u64("SLOTBOOK_REMINDER_TICK_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTBOOK_REMINDER_ADMIN_HOLDER_ID") {
            self.reminder.admin_holder_id =
                Some(HolderId(parse_i64("SLOTBOOK_REMINDER_ADMIN_HOLDER_ID", &value)?));
        }
        if let Some(value) = read_env("SLOTBOOK_REMINDER_MAX_DELIVERY_ATTEMPTS") {
            self.reminder.max_delivery_attempts =
                parse_u32("SLOTBOOK_REMINDER_MAX_DELIVERY_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("SLOTBOOK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SLOTBOOK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SLOTBOOK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SLOTBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SLOTBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SLOTBOOK_LOGGING_LEVEL").or_else(|| read_env("SLOTBOOK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLOTBOOK_LOGGING_FORMAT").or_else(|| read_env("SLOTBOOK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(backend) = overrides.ledger_backend {
            self.ledger.backend = backend;
        }
        if let Some(sqlite_url) = overrides.sqlite_url {
            self.ledger.sqlite_url = sqlite_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(admin_holder_id) = overrides.admin_holder_id {
            self.reminder.admin_holder_id = Some(HolderId(admin_holder_id));
        }
        if let Some(trigger_at) = overrides.trigger_at {
            self.reminder.trigger_at = Some(trigger_at);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.event.calendar()?;
        validate_booking(&self.booking)?;
        validate_ledger(&self.ledger)?;
        validate_telegram(&self.telegram)?;
        validate_reminder(&self.reminder)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("slotbook.toml"), PathBuf::from("config/slotbook.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

pub fn parse_trigger_at(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value.trim(), TRIGGER_AT_FORMAT)
        .map_err(|_| format!("`{value}` is not a `YYYY-MM-DD HH:MM` local time"))
}

fn parse_timezone(value: &str) -> Result<Tz, String> {
    value.trim().parse::<Tz>().map_err(|_| format!("`{value}` is not an IANA timezone name"))
}

fn file_error(key: &str, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::Validation(format!("{key}: {error}"))
}

fn validate_booking(booking: &BookingConfig) -> Result<(), ConfigError> {
    if booking.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "booking.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if booking.max_listed_slots == 0 || booking.max_listed_slots > 100 {
        return Err(ConfigError::Validation(
            "booking.max_listed_slots must be in range 1..=100 (inline keyboards cap at 100 buttons)"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.timeout_secs == 0 || ledger.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "ledger.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match ledger.backend {
        LedgerBackend::Sheets => {
            let missing_id = ledger
                .spreadsheet_id
                .as_ref()
                .map(|value| value.trim().is_empty())
                .unwrap_or(true);
            if missing_id {
                return Err(ConfigError::Validation(
                    "ledger.spreadsheet_id is required for the sheets backend. Copy it from the spreadsheet URL: https://docs.google.com/spreadsheets/d/<id>/edit".to_string(),
                ));
            }
            let missing_token = ledger
                .access_token
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_token {
                return Err(ConfigError::Validation(
                    "ledger.access_token is required for the sheets backend".to_string(),
                ));
            }
            if ledger.sheet_name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "ledger.sheet_name must not be empty".to_string(),
                ));
            }
            if !ledger.api_base_url.starts_with("http://")
                && !ledger.api_base_url.starts_with("https://")
            {
                return Err(ConfigError::Validation(
                    "ledger.api_base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        LedgerBackend::Sqlite => {
            let url = ledger.sqlite_url.trim();
            let sqlite_url =
                url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
            if !sqlite_url {
                return Err(ConfigError::Validation(
                    "ledger.sqlite_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                        .to_string(),
                ));
            }
            if ledger.max_connections == 0 {
                return Err(ConfigError::Validation(
                    "ledger.max_connections must be greater than zero".to_string(),
                ));
            }
        }
        LedgerBackend::Memory => {}
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let bot_token = telegram.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Create a bot with @BotFather and copy the token it issues".to_string(),
        ));
    }
    let well_formed = bot_token
        .split_once(':')
        .map(|(id, secret)| {
            !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) && !secret.is_empty()
        })
        .unwrap_or(false);
    if !well_formed {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                .to_string(),
        ));
    }
    if telegram.poll_timeout_secs > 50 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be at most 50".to_string(),
        ));
    }
    Ok(())
}

fn validate_reminder(reminder: &ReminderConfig) -> Result<(), ConfigError> {
    if reminder.tick_secs == 0 {
        return Err(ConfigError::Validation(
            "reminder.tick_secs must be greater than zero".to_string(),
        ));
    }
    if reminder.confirm_window_secs == 0 {
        return Err(ConfigError::Validation(
            "reminder.confirm_window_secs must be greater than zero".to_string(),
        ));
    }
    if reminder.max_delivery_attempts == 0 {
        return Err(ConfigError::Validation(
            "reminder.max_delivery_attempts must be greater than zero".to_string(),
        ));
    }
    reminder.schedule()?;
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_env(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_env(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_env(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| invalid_env(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_env(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    event: Option<EventPatch>,
    booking: Option<BookingPatch>,
    ledger: Option<LedgerPatch>,
    telegram: Option<TelegramPatch>,
    reminder: Option<ReminderPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EventPatch {
    days: Option<Vec<String>>,
    opening: Option<String>,
    closing: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BookingPatch {
    idle_timeout_secs: Option<u64>,
    max_listed_slots: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    backend: Option<LedgerBackend>,
    timeout_secs: Option<u64>,
    spreadsheet_id: Option<String>,
    sheet_name: Option<String>,
    sheet_gid: Option<u64>,
    access_token: Option<String>,
    api_base_url: Option<String>,
    sqlite_url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReminderPatch {
    trigger_at: Option<String>,
    timezone: Option<String>,
    tick_secs: Option<u64>,
    admin_holder_id: Option<i64>,
    confirm_window_secs: Option<u64>,
    max_delivery_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
