//! Named high-water marks over raw record ids

use chrono::Utc;
use sqlx::SqlitePool;

use super::encode_ts;
use crate::error::Result;

#[derive(Clone)]
pub struct CursorStore {
    pool: SqlitePool,
}

impl CursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Last processed raw record id, 0 when the cursor was never advanced
    pub async fn get(&self, name: &str) -> Result<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_raw_record_id FROM pipeline_cursors WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or(0))
    }

    /// Move the cursor forward; it never moves backwards
    pub async fn advance(&self, name: &str, raw_record_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_cursors (name, last_raw_record_id, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET
                last_raw_record_id = MAX(pipeline_cursors.last_raw_record_id, excluded.last_raw_record_id),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(raw_record_id)
        .bind(encode_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
