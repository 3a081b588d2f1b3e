//! Raw store: schema-on-read event payloads with provenance

use chrono::{DateTime, Utc};
use logpipe_common::AppendOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;

use super::{decode_ts, encode_ts};
use crate::error::{PipelineError, Result};

const TABLE: &str = "raw_records";

/// One ingested event (maps to the raw_records table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Store-assigned ordinal; increases with ingestion order
    pub id: i64,
    pub ingest_timestamp: DateTime<Utc>,
    pub source_file_id: String,
    pub position_in_file: i64,
    pub payload: Value,
}

impl RawRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let ingest_timestamp: String = row.try_get("ingest_timestamp")?;
        let payload: String = row.try_get("payload")?;

        Ok(Self {
            id: row.try_get("id")?,
            ingest_timestamp: decode_ts(TABLE, &ingest_timestamp)?,
            source_file_id: row.try_get("source_file_id")?,
            position_in_file: row.try_get("position_in_file")?,
            payload: serde_json::from_str(&payload)
                .map_err(|e| PipelineError::corrupt_row(TABLE, e))?,
        })
    }
}

#[derive(Clone)]
pub struct RawStore {
    pool: SqlitePool,
}

impl RawStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one record; a duplicate `(source_file_id, position_in_file)` is a no-op
    pub async fn append(
        &self,
        ingest_timestamp: DateTime<Utc>,
        source_file_id: &str,
        position_in_file: i64,
        payload: &Value,
    ) -> Result<AppendOutcome> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, ingest_timestamp, source_file_id, position_in_file, payload).await
    }

    /// Insert on an existing connection so callers can group rows in a transaction
    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        ingest_timestamp: DateTime<Utc>,
        source_file_id: &str,
        position_in_file: i64,
        payload: &Value,
    ) -> Result<AppendOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_records (ingest_timestamp, source_file_id, position_in_file, payload)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (source_file_id, position_in_file) DO NOTHING
            "#,
        )
        .bind(encode_ts(&ingest_timestamp))
        .bind(source_file_id)
        .bind(position_in_file)
        .bind(serde_json::to_string(payload)?)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            Ok(AppendOutcome::DuplicateKeyRejected)
        } else {
            Ok(AppendOutcome::Inserted(result.last_insert_rowid()))
        }
    }

    /// Records with `id > after_id`, optionally limited to `ingest_timestamp >= since`,
    /// in ingestion order
    pub async fn scan_page(
        &self,
        after_id: i64,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ingest_timestamp, source_file_id, position_in_file, payload
            FROM raw_records
            WHERE id > ?1 AND (?2 IS NULL OR ingest_timestamp >= ?2)
            ORDER BY id
            LIMIT ?3
            "#,
        )
        .bind(after_id)
        .bind(since.as_ref().map(encode_ts))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(RawRecord::from_row).collect()
    }

    /// Range scan by ingest timestamp: `from <= ingest_timestamp < to`
    pub async fn scan_by_ingest_time(
        &self,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ingest_timestamp, source_file_id, position_in_file, payload
            FROM raw_records
            WHERE ingest_timestamp >= ?1 AND (?2 IS NULL OR ingest_timestamp < ?2)
            ORDER BY id
            "#,
        )
        .bind(encode_ts(&from))
        .bind(to.as_ref().map(encode_ts))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(RawRecord::from_row).collect()
    }

    /// All records of one staged file, in file order
    pub async fn scan_by_source_file(&self, source_file_id: &str) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ingest_timestamp, source_file_id, position_in_file, payload
            FROM raw_records
            WHERE source_file_id = ?1
            ORDER BY position_in_file
            "#,
        )
        .bind(source_file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(RawRecord::from_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn max_id(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM raw_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }
}
