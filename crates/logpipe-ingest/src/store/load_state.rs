//! Per-file load tracking (maps to the load_state table)

use chrono::{DateTime, Utc};
use logpipe_common::FileStatus;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;

use super::{decode_ts, encode_ts};
use crate::error::{PipelineError, Result};

const TABLE: &str = "load_state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadState {
    pub source_file_id: String,
    pub status: FileStatus,
    pub loaded_record_count: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LoadState {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            source_file_id: row.try_get("source_file_id")?,
            status: status
                .parse()
                .map_err(|e| PipelineError::corrupt_row(TABLE, e))?,
            loaded_record_count: row.try_get("loaded_record_count")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            updated_at: decode_ts(TABLE, &updated_at)?,
        })
    }
}

/// Aggregate view over all tracked files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub pending: i64,
    pub loaded: i64,
    pub failed: i64,
    pub loaded_records: i64,
}

#[derive(Clone)]
pub struct LoadStateStore {
    pool: SqlitePool,
}

impl LoadStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, source_file_id: &str) -> Result<Option<LoadState>> {
        let row = sqlx::query(
            r#"
            SELECT source_file_id, status, loaded_record_count, attempts, last_error, updated_at
            FROM load_state
            WHERE source_file_id = ?1
            "#,
        )
        .bind(source_file_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(LoadState::from_row).transpose()
    }

    /// Status of a file; untracked files are pending
    pub async fn status(&self, source_file_id: &str) -> Result<FileStatus> {
        Ok(self
            .get(source_file_id)
            .await?
            .map(|state| state.status)
            .unwrap_or_default())
    }

    pub async fn all(&self) -> Result<Vec<LoadState>> {
        let rows = sqlx::query(
            r#"
            SELECT source_file_id, status, loaded_record_count, attempts, last_error, updated_at
            FROM load_state
            ORDER BY source_file_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(LoadState::from_row).collect()
    }

    /// Start tracking a newly discovered file. Existing rows are left untouched.
    pub async fn mark_pending(&self, source_file_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_state (source_file_id, status, updated_at)
            VALUES (?1, 'pending', ?2)
            ON CONFLICT (source_file_id) DO NOTHING
            "#,
        )
        .bind(source_file_id)
        .bind(encode_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition to loaded inside the caller's transaction.
    ///
    /// Returns false when the file was already loaded (another worker won).
    pub(crate) async fn record_loaded(
        conn: &mut SqliteConnection,
        source_file_id: &str,
        record_count: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO load_state (source_file_id, status, loaded_record_count, attempts, updated_at)
            VALUES (?1, 'loaded', ?2, 1, ?3)
            ON CONFLICT (source_file_id) DO UPDATE SET
                status = 'loaded',
                loaded_record_count = excluded.loaded_record_count,
                attempts = load_state.attempts + 1,
                last_error = NULL,
                updated_at = excluded.updated_at
            WHERE load_state.status != 'loaded'
            "#,
        )
        .bind(source_file_id)
        .bind(record_count)
        .bind(encode_ts(&Utc::now()))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt; a loaded file never regresses to failed
    pub async fn record_failed(&self, source_file_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_state (source_file_id, status, attempts, last_error, updated_at)
            VALUES (?1, 'failed', 1, ?2, ?3)
            ON CONFLICT (source_file_id) DO UPDATE SET
                status = 'failed',
                attempts = load_state.attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            WHERE load_state.status != 'loaded'
            "#,
        )
        .bind(source_file_id)
        .bind(error)
        .bind(encode_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Total records committed across loaded files
    pub async fn loaded_record_count(&self) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(loaded_record_count) FROM load_state WHERE status = 'loaded'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    pub async fn summary(&self) -> Result<LoadSummary> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS files, COALESCE(SUM(loaded_record_count), 0) AS records
            FROM load_state
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = LoadSummary::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let files: i64 = row.try_get("files")?;
            match status.parse::<FileStatus>() {
                Ok(FileStatus::Pending) => summary.pending = files,
                Ok(FileStatus::Loaded) => {
                    summary.loaded = files;
                    summary.loaded_records = row.try_get("records")?;
                },
                Ok(FileStatus::Failed) => summary.failed = files,
                Err(e) => return Err(PipelineError::corrupt_row(TABLE, e)),
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn test_untracked_file_is_pending() {
        let store = LoadStateStore::new(connect_in_memory().await.unwrap());
        assert_eq!(store.status("nope.jsonl").await.unwrap(), FileStatus::Pending);
        assert!(store.get("nope.jsonl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_to_loaded_once() {
        let pool = connect_in_memory().await.unwrap();
        let store = LoadStateStore::new(pool.clone());
        store.mark_pending("a.jsonl").await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert!(LoadStateStore::record_loaded(&mut conn, "a.jsonl", 3).await.unwrap());
        assert!(!LoadStateStore::record_loaded(&mut conn, "a.jsonl", 3).await.unwrap());
        drop(conn);

        let state = store.get("a.jsonl").await.unwrap().unwrap();
        assert_eq!(state.status, FileStatus::Loaded);
        assert_eq!(state.loaded_record_count, 3);
        assert_eq!(state.attempts, 1);
        assert_eq!(store.loaded_record_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failure_then_retry_success() {
        let pool = connect_in_memory().await.unwrap();
        let store = LoadStateStore::new(pool.clone());

        store.record_failed("b.jsonl", "bad line 2").await.unwrap();
        let failed = store.get("b.jsonl").await.unwrap().unwrap();
        assert_eq!(failed.status, FileStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("bad line 2"));

        let mut conn = pool.acquire().await.unwrap();
        LoadStateStore::record_loaded(&mut conn, "b.jsonl", 4).await.unwrap();
        drop(conn);

        let loaded = store.get("b.jsonl").await.unwrap().unwrap();
        assert_eq!(loaded.status, FileStatus::Loaded);
        assert_eq!(loaded.attempts, 2);
        assert!(loaded.last_error.is_none());

        // loaded files never regress
        store.record_failed("b.jsonl", "late failure").await.unwrap();
        assert_eq!(store.status("b.jsonl").await.unwrap(), FileStatus::Loaded);
    }

    #[tokio::test]
    async fn test_summary() {
        let pool = connect_in_memory().await.unwrap();
        let store = LoadStateStore::new(pool.clone());
        store.mark_pending("p.jsonl").await.unwrap();
        store.record_failed("f.jsonl", "boom").await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        LoadStateStore::record_loaded(&mut conn, "l1.jsonl", 2).await.unwrap();
        LoadStateStore::record_loaded(&mut conn, "l2.jsonl", 5).await.unwrap();
        drop(conn);

        let summary = store.summary().await.unwrap();
        assert_eq!(
            summary,
            LoadSummary {
                pending: 1,
                loaded: 2,
                failed: 1,
                loaded_records: 7,
            }
        );
        assert_eq!(store.all().await.unwrap().len(), 4);
    }
}
