pub mod connection;
pub mod migrations;
pub mod sheets;
pub mod sqlite;

use std::sync::Arc;

use slotbook_core::config::{LedgerBackend, LedgerConfig};
use slotbook_core::ledger::{InMemoryLedger, LedgerClient, TimeoutLedger};
use thiserror::Error;
use tracing::info;

pub use connection::{connect, connect_with_settings, DbPool};
pub use sheets::{SheetsLedger, SheetsSetupError};
pub use sqlite::SqliteLedger;

#[derive(Debug, Error)]
pub enum LedgerOpenError {
    #[error("sqlite connection failed: {0}")]
    Connect(#[from] sqlx::Error),
    #[error("sqlite migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("spreadsheet ledger setup failed: {0}")]
    Sheets(#[from] SheetsSetupError),
}

/// Builds the configured backend, wrapped so every call is bounded by `ledger.timeout_secs`.
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn LedgerClient>, LedgerOpenError> {
    let timeout = config.timeout();
    let ledger: Arc<dyn LedgerClient> = match config.backend {
        LedgerBackend::Sheets => {
            Arc::new(TimeoutLedger::new(SheetsLedger::from_config(config)?, timeout))
        }
        LedgerBackend::Sqlite => {
            let pool = connect(config).await?;
            migrations::run_pending(&pool).await?;
            Arc::new(TimeoutLedger::new(SqliteLedger::new(pool), timeout))
        }
        LedgerBackend::Memory => Arc::new(TimeoutLedger::new(InMemoryLedger::new(), timeout)),
    };

    info!(
        event_name = "ledger.opened",
        backend = ?config.backend,
        timeout_secs = config.timeout_secs,
        "ledger backend ready"
    );
    Ok(ledger)
}
