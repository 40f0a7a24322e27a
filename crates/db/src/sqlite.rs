//! SQLite-backed ledger. Positions follow `id` order exactly like spreadsheet rows follow
//! sheet order, so callers cannot tell the two backends apart. Position-addressed writes
//! resolve the position and apply the change inside one transaction.

use async_trait::async_trait;
use slotbook_core::domain::{FieldValue, LedgerField, LedgerPosition, Reservation};
use slotbook_core::ledger::{decode_rows, LedgerClient, LedgerError, LedgerRecord};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

use crate::DbPool;

pub struct SqliteLedger {
    pool: DbPool,
}

impl SqliteLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn unavailable(operation: &'static str) -> impl Fn(sqlx::Error) -> LedgerError {
    move |error| {
        warn!(
            event_name = "ledger.sqlite.failed",
            operation,
            error = %error,
            "sqlite ledger call failed"
        );
        LedgerError::Unavailable(format!("{operation}: {error}"))
    }
}

fn cells_from_row(row: &SqliteRow) -> Result<Vec<String>, LedgerError> {
    LedgerField::ALL
        .iter()
        .map(|field| {
            row.try_get::<String, _>(field.column_name())
                .map_err(|error| LedgerError::Malformed(error.to_string()))
        })
        .collect()
}

async fn row_id(
    connection: &mut SqliteConnection,
    position: LedgerPosition,
) -> Result<i64, LedgerError> {
    let offset = position
        .record_index()
        .and_then(|index| i64::try_from(index).ok())
        .ok_or(LedgerError::PositionOutOfRange(position))?;

    let row = sqlx::query("SELECT id FROM ledger_row ORDER BY id LIMIT 1 OFFSET ?")
        .bind(offset)
        .fetch_optional(&mut *connection)
        .await
        .map_err(unavailable("resolve_position"))?;

    row.map(|row| row.get::<i64, _>("id")).ok_or(LedgerError::PositionOutOfRange(position))
}

#[async_trait]
impl LedgerClient for SqliteLedger {
    async fn append(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        let cells = reservation.to_row();
        let mut query = sqlx::query(
            "INSERT INTO ledger_row (
                holder_id,
                name,
                phone,
                day,
                time,
                status,
                reminder_sent_at,
                attendance_confirmed
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        );
        for cell in cells {
            query = query.bind(cell);
        }
        query.execute(&self.pool).await.map_err(unavailable("append"))?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT
                holder_id,
                name,
                phone,
                day,
                time,
                status,
                reminder_sent_at,
                attendance_confirmed
             FROM ledger_row
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("read_all"))?;

        let cells = rows.iter().map(cells_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(decode_rows(cells))
    }

    async fn update_field(
        &self,
        position: LedgerPosition,
        field: LedgerField,
        value: &FieldValue,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(unavailable("update_field"))?;
        let id = row_id(&mut tx, position).await?;

        // column names come from a closed enum, never from input
        let statement = format!("UPDATE ledger_row SET {} = ? WHERE id = ?", field.column_name());
        sqlx::query(&statement)
            .bind(value.to_cell())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("update_field"))?;

        tx.commit().await.map_err(unavailable("update_field"))
    }

    async fn delete(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(unavailable("delete"))?;
        let id = row_id(&mut tx, position).await?;

        sqlx::query("DELETE FROM ledger_row WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("delete"))?;

        tx.commit().await.map_err(unavailable("delete"))
    }
}
