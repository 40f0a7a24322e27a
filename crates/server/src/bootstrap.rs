use std::sync::Arc;

use slotbook_core::admin::AdminOverride;
use slotbook_core::audit::{AuditSink, TracingAuditSink};
use slotbook_core::booking::BookingService;
use slotbook_core::clock::{Clock, SystemClock};
use slotbook_core::config::{AppConfig, ConfigError, LoadOptions};
use slotbook_core::conversations::ConversationStore;
use slotbook_core::inventory::SlotInventory;
use slotbook_core::ledger::LedgerClient;
use slotbook_core::reconciler::Reconciler;
use slotbook_core::reminder::{ReminderScheduler, ReminderWorkflow};
use slotbook_db::{open_ledger, LedgerOpenError};
use slotbook_telegram::{
    bot_dispatcher, ApiError, BotApi, BotApiTransport, BotService, PollingRunner,
    ReconnectPolicy, TelegramClient, TelegramReminderNotifier,
};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub ledger: Arc<dyn LedgerClient>,
    pub booking: Arc<BookingService>,
    /// Absent when no reminder trigger is configured.
    pub scheduler: Option<ReminderScheduler>,
    pub bot_runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerOpenError),
    #[error("telegram client setup failed: {0}")]
    Telegram(#[from] ApiError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let calendar = config.event.calendar()?;
    let schedule = config.reminder.schedule()?;

    let ledger = open_ledger(&config.ledger).await?;
    let inventory = Arc::new(SlotInventory::new(calendar.clone()));
    let reconciler = Arc::new(Reconciler::new(ledger.clone(), inventory));
    match reconciler.refresh().await {
        Ok(()) => info!(
            event_name = "system.bootstrap.inventory_loaded",
            correlation_id = "bootstrap",
            occupied = reconciler.inventory().occupied_count(),
            "slot inventory loaded from the ledger"
        ),
        // listings fall back to the cache and every write re-reads the ledger anyway
        Err(error) => warn!(
            event_name = "system.bootstrap.inventory_unavailable",
            correlation_id = "bootstrap",
            error = %error,
            "ledger unreachable at startup; starting with an empty slot cache"
        ),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let api: Arc<dyn BotApi> = Arc::new(TelegramClient::new(
        config.telegram.api_base_url.clone(),
        config.telegram.bot_token.clone(),
        config.telegram.poll_timeout_secs,
    )?);

    let booking = Arc::new(
        BookingService::new(
            reconciler.clone(),
            Arc::new(ConversationStore::new(config.booking.idle_timeout())),
            audit.clone(),
            clock.clone(),
        )
        .with_max_listed_slots(config.booking.max_listed_slots),
    );
    let reminders = Arc::new(
        ReminderWorkflow::new(
            reconciler,
            Arc::new(TelegramReminderNotifier::new(api.clone())),
            audit.clone(),
            clock.clone(),
        )
        .with_max_delivery_attempts(config.reminder.max_delivery_attempts),
    );
    let admin = Arc::new(
        AdminOverride::new(
            config.reminder.admin_holder_id,
            reminders.clone(),
            audit,
            clock.clone(),
        )
        .with_confirm_window(config.reminder.confirm_window()),
    );
    if config.reminder.admin_holder_id.is_none() {
        warn!(
            event_name = "system.bootstrap.no_admin",
            correlation_id = "bootstrap",
            "no admin holder configured; /remind is disabled"
        );
    }

    let scheduler =
        schedule.map(|schedule| ReminderScheduler::new(reminders.clone(), schedule, clock));
    let service = Arc::new(BotService::new(booking.clone(), reminders, admin, calendar));
    let bot_runner = PollingRunner::new(
        Arc::new(BotApiTransport::new(api, config.telegram.poll_timeout_secs)),
        bot_dispatcher(service),
        ReconnectPolicy::default(),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        ledger_backend = ?config.ledger.backend,
        reminders_scheduled = scheduler.is_some(),
        "application wired"
    );
    Ok(Application { config, ledger, booking, scheduler, bot_runner })
}
