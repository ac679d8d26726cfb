use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meta_core::{CoreError, CoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::error::SqlxErrorExt;
use crate::model::{CheckpointQuery, CheckpointRow, ProviderStateRow};
use crate::store::CheckpointStore;

/// SQLite-backed `CheckpointStore`: a single pool, no per-call connection
/// management.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (creating if absent) the SQLite database at `path` and run the
    /// two-table schema used by the persisted layout.
    pub async fn connect(path: impl AsRef<Path>) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))
            .map_err(|e| CoreError::internal(format!("invalid session db path: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(SqlxErrorExt::into_core_error)?;
        let store = SqliteCheckpointStore { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wrap an already-open pool; used by tests to share an in-memory pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteCheckpointStore { pool }
    }

    /// An ephemeral, migrated, in-memory store — for tests in this crate
    /// and in downstream crates that exercise `CheckpointStore` without a
    /// real on-disk database.
    pub async fn in_memory() -> CoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(SqlxErrorExt::into_core_error)?;
        let store = SqliteCheckpointStore { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> CoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provider_state (
                provider_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                permits_held INTEGER NOT NULL,
                total_processed INTEGER NOT NULL,
                error_count INTEGER NOT NULL,
                last_checkpoint_urn TEXT,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_core_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                provider_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                urn TEXT NOT NULL,
                success INTEGER NOT NULL,
                error_message TEXT,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (provider_id, sequence)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_core_error)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn upsert_provider_state(&self, row: &ProviderStateRow) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO provider_state
             (provider_id, state, permits_held, total_processed, error_count, last_checkpoint_urn, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(provider_id) DO UPDATE SET
             state = excluded.state,
             permits_held = excluded.permits_held,
             total_processed = excluded.total_processed,
             error_count = excluded.error_count,
             last_checkpoint_urn = excluded.last_checkpoint_urn,
             updated_at = excluded.updated_at",
        )
        .bind(&row.provider_id)
        .bind(&row.state)
        .bind(row.permits_held as i64)
        .bind(row.total_processed as i64)
        .bind(row.error_count as i64)
        .bind(&row.last_checkpoint_urn)
        .bind(row.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_core_error)?;
        Ok(())
    }

    async fn get_provider_state(&self, provider_id: &str) -> CoreResult<Option<ProviderStateRow>> {
        let row = sqlx::query("SELECT * FROM provider_state WHERE provider_id = ?")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_core_error)?;
        row.map(provider_state_from_row).transpose()
    }

    async fn scan_provider_states(&self) -> CoreResult<Vec<ProviderStateRow>> {
        let rows = sqlx::query("SELECT * FROM provider_state")
            .fetch_all(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_core_error)?;
        rows.into_iter().map(provider_state_from_row).collect()
    }

    async fn append_checkpoint(&self, row: &CheckpointRow) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO checkpoints (provider_id, sequence, urn, success, error_message, processed_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.provider_id)
        .bind(row.sequence)
        .bind(&row.urn)
        .bind(row.success)
        .bind(&row.error_message)
        .bind(row.processed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_core_error)?;
        Ok(())
    }

    async fn next_sequence(&self, provider_id: &str) -> CoreResult<i64> {
        let row = sqlx::query("SELECT MAX(sequence) AS max_seq FROM checkpoints WHERE provider_id = ?")
            .bind(provider_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_core_error)?;
        let max_seq: Option<i64> = row.try_get("max_seq").map_err(SqlxErrorExt::into_core_error)?;
        Ok(max_seq.map(|s| s + 1).unwrap_or(0))
    }

    async fn list_checkpoints(&self, provider_id: &str, query: &CheckpointQuery) -> CoreResult<(Vec<CheckpointRow>, u64)> {
        let total: i64 = if query.success_only {
            sqlx::query("SELECT COUNT(*) AS c FROM checkpoints WHERE provider_id = ? AND success = 1")
                .bind(provider_id)
                .fetch_one(&self.pool)
                .await
                .and_then(|r| r.try_get("c"))
                .map_err(SqlxErrorExt::into_core_error)?
        } else {
            sqlx::query("SELECT COUNT(*) AS c FROM checkpoints WHERE provider_id = ?")
                .bind(provider_id)
                .fetch_one(&self.pool)
                .await
                .and_then(|r| r.try_get("c"))
                .map_err(SqlxErrorExt::into_core_error)?
        };

        let rows = if query.success_only {
            sqlx::query(
                "SELECT * FROM checkpoints WHERE provider_id = ? AND success = 1
                 ORDER BY sequence DESC LIMIT ?",
            )
            .bind(provider_id)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_core_error)?
        } else {
            sqlx::query("SELECT * FROM checkpoints WHERE provider_id = ? ORDER BY sequence DESC LIMIT ?")
                .bind(provider_id)
                .bind(query.limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(SqlxErrorExt::into_core_error)?
        };

        let rows = rows.into_iter().map(checkpoint_from_row).collect::<CoreResult<Vec<_>>>()?;
        Ok((rows, total as u64))
    }
}

fn provider_state_from_row(row: sqlx::sqlite::SqliteRow) -> CoreResult<ProviderStateRow> {
    let updated_at: String = row.try_get("updated_at").map_err(SqlxErrorExt::into_core_error)?;
    Ok(ProviderStateRow {
        provider_id: row.try_get("provider_id").map_err(SqlxErrorExt::into_core_error)?,
        state: row.try_get("state").map_err(SqlxErrorExt::into_core_error)?,
        permits_held: row.try_get::<i64, _>("permits_held").map_err(SqlxErrorExt::into_core_error)? as u32,
        total_processed: row.try_get::<i64, _>("total_processed").map_err(SqlxErrorExt::into_core_error)? as u64,
        error_count: row.try_get::<i64, _>("error_count").map_err(SqlxErrorExt::into_core_error)? as u64,
        last_checkpoint_urn: row.try_get("last_checkpoint_urn").map_err(SqlxErrorExt::into_core_error)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn checkpoint_from_row(row: sqlx::sqlite::SqliteRow) -> CoreResult<CheckpointRow> {
    let processed_at: String = row.try_get("processed_at").map_err(SqlxErrorExt::into_core_error)?;
    Ok(CheckpointRow {
        provider_id: row.try_get("provider_id").map_err(SqlxErrorExt::into_core_error)?,
        sequence: row.try_get("sequence").map_err(SqlxErrorExt::into_core_error)?,
        urn: row.try_get("urn").map_err(SqlxErrorExt::into_core_error)?,
        success: row.try_get("success").map_err(SqlxErrorExt::into_core_error)?,
        error_message: row.try_get("error_message").map_err(SqlxErrorExt::into_core_error)?,
        processed_at: parse_timestamp(&processed_at)?,
    })
}

fn parse_timestamp(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::internal(format!("corrupt timestamp in checkpoint store: {e}")))
}
