mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use slotbook_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use slotbook_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level so single modules can be turned up
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.ledger.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if let Some(scheduler) = app.scheduler {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { scheduler.run(shutdown).await }));
    }

    let booking = app.booking.clone();
    let mut janitor_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = booking.evict_idle_conversations();
                    if evicted > 0 {
                        tracing::debug!(
                            event_name = "system.janitor.evicted",
                            evicted,
                            "idle conversations evicted"
                        );
                    }
                }
                _ = janitor_shutdown.changed() => break,
            }
        }
    }));

    let bot_runner = app.bot_runner;
    let bot_shutdown = shutdown_rx;
    tasks.push(tokio::spawn(async move {
        if let Err(error) = bot_runner.run(bot_shutdown).await {
            tracing::error!(
                event_name = "system.server.bot_failed",
                error = %error,
                "telegram polling stopped with an error"
            );
        }
    }));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "slotbook-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "slotbook-server stopping"
    );

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    for task in tasks {
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                grace_secs = grace.as_secs(),
                "background task did not stop within the grace period"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
