//! Curated store: fixed-schema projection of raw records

use chrono::{DateTime, Utc};
use logpipe_common::AppendOutcome;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use super::{decode_ts, encode_ts};
use crate::error::{PipelineError, Result};

const TABLE: &str = "curated_records";

const SELECT_COLUMNS: &str = "id, raw_record_id, source_file_id, position_in_file, event_ts, \
     service, level, event_type, host, status_code, latency_ms, message, curated_at";

/// The typed columns; `None` is SQL NULL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratedFields {
    pub event_ts: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub event_type: Option<String>,
    pub host: Option<String>,
    pub status_code: Option<i64>,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl CuratedFields {
    pub const FIELD_COUNT: usize = 8;

    pub fn null_count(&self) -> usize {
        [
            self.event_ts.is_none(),
            self.service.is_none(),
            self.level.is_none(),
            self.event_type.is_none(),
            self.host.is_none(),
            self.status_code.is_none(),
            self.latency_ms.is_none(),
            self.message.is_none(),
        ]
        .into_iter()
        .filter(|null| *null)
        .count()
    }

    /// True when nothing could be extracted
    pub fn is_empty(&self) -> bool {
        self.null_count() == Self::FIELD_COUNT
    }
}

/// Row to be written; lineage plus the copied raw dedup key
#[derive(Debug, Clone, PartialEq)]
pub struct NewCuratedRecord {
    pub raw_record_id: i64,
    pub source_file_id: String,
    pub position_in_file: i64,
    pub fields: CuratedFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedRecord {
    pub id: i64,
    pub raw_record_id: i64,
    pub source_file_id: String,
    pub position_in_file: i64,
    #[serde(flatten)]
    pub fields: CuratedFields,
    pub curated_at: DateTime<Utc>,
}

impl CuratedRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let event_ts: Option<String> = row.try_get("event_ts")?;
        let curated_at: String = row.try_get("curated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            raw_record_id: row.try_get("raw_record_id")?,
            source_file_id: row.try_get("source_file_id")?,
            position_in_file: row.try_get("position_in_file")?,
            fields: CuratedFields {
                event_ts: event_ts.as_deref().map(|ts| decode_ts(TABLE, ts)).transpose()?,
                service: row.try_get("service")?,
                level: row.try_get("level")?,
                event_type: row.try_get("event_type")?,
                host: row.try_get("host")?,
                status_code: row.try_get("status_code")?,
                latency_ms: row.try_get("latency_ms")?,
                message: row.try_get("message")?,
            },
            curated_at: decode_ts(TABLE, &curated_at)?,
        })
    }

    /// One-line rendering fed to summarize/classify:
    /// `[<ts>] <service>/<level>/<event_type>@<host>: <message>`
    pub fn descriptive_text(&self) -> String {
        let f = &self.fields;
        let ts = f
            .event_ts
            .map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| "unknown time".to_string());

        let category: Vec<&str> = [&f.service, &f.level, &f.event_type]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();

        let mut origin = category.join("/");
        if let Some(host) = &f.host {
            origin.push('@');
            origin.push_str(host);
        }

        let mut text = format!("[{ts}]");
        if !origin.is_empty() {
            text.push(' ');
            text.push_str(&origin);
        }
        if let Some(message) = &f.message {
            text.push_str(": ");
            text.push_str(message);
        }
        text
    }
}

/// Categorical columns usable for grouped summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    Service,
    Level,
    EventType,
    Host,
}

impl GroupField {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupField::Service => "service",
            GroupField::Level => "level",
            GroupField::EventType => "event_type",
            GroupField::Host => "host",
        }
    }

    /// Value of this column on a record
    pub fn value_of<'a>(&self, fields: &'a CuratedFields) -> Option<&'a str> {
        match self {
            GroupField::Service => fields.service.as_deref(),
            GroupField::Level => fields.level.as_deref(),
            GroupField::EventType => fields.event_type.as_deref(),
            GroupField::Host => fields.host.as_deref(),
        }
    }
}

impl FromStr for GroupField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "service" => Ok(GroupField::Service),
            "level" => Ok(GroupField::Level),
            "event_type" | "event-type" => Ok(GroupField::EventType),
            "host" => Ok(GroupField::Host),
            other => Err(PipelineError::config(format!("Unknown group field '{other}'"))),
        }
    }
}

impl std::fmt::Display for GroupField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct CuratedStore {
    pool: SqlitePool,
}

impl CuratedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one record; a duplicate lineage key is a no-op
    pub async fn append(&self, record: &NewCuratedRecord) -> Result<AppendOutcome> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, record).await
    }

    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        record: &NewCuratedRecord,
    ) -> Result<AppendOutcome> {
        let f = &record.fields;
        let result = sqlx::query(
            r#"
            INSERT INTO curated_records (
                raw_record_id, source_file_id, position_in_file, event_ts,
                service, level, event_type, host, status_code, latency_ms, message, curated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (raw_record_id) DO NOTHING
            "#,
        )
        .bind(record.raw_record_id)
        .bind(&record.source_file_id)
        .bind(record.position_in_file)
        .bind(f.event_ts.as_ref().map(encode_ts))
        .bind(&f.service)
        .bind(&f.level)
        .bind(&f.event_type)
        .bind(&f.host)
        .bind(f.status_code)
        .bind(f.latency_ms)
        .bind(&f.message)
        .bind(encode_ts(&Utc::now()))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            Ok(AppendOutcome::DuplicateKeyRejected)
        } else {
            Ok(AppendOutcome::Inserted(result.last_insert_rowid()))
        }
    }

    /// Records in lineage (ingestion) order, `raw_record_id > after`
    pub async fn list(&self, after_raw_id: i64, limit: i64) -> Result<Vec<CuratedRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM curated_records \
             WHERE raw_record_id > ?1 ORDER BY raw_record_id LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(after_raw_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(CuratedRecord::from_row).collect()
    }

    pub async fn all(&self) -> Result<Vec<CuratedRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM curated_records ORDER BY raw_record_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(CuratedRecord::from_row).collect()
    }

    pub async fn get_by_lineage(&self, raw_record_id: i64) -> Result<Option<CuratedRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM curated_records WHERE raw_record_id = ?1");
        let row = sqlx::query(&sql)
            .bind(raw_record_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(CuratedRecord::from_row).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curated_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
