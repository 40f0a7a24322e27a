use std::str::FromStr;
use std::time::Duration;

use slotbook_core::config::LedgerConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(config: &LedgerConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.sqlite_url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool, creating the database file when it does not exist yet. In-memory databases
/// are private to one connection, so callers using them should ask for a single connection.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(options)
        .await
}
