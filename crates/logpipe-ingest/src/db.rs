//! SQLite connection pool and schema migrations

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};

const MEMORY_URL: &str = "sqlite::memory:";

/// Open the pool described by `config` and apply migrations
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    if is_memory_url(&config.url) {
        return connect_in_memory().await;
    }
    if config.url.contains("mode=memory") {
        return Err(PipelineError::config(format!(
            "Named in-memory database '{}' is not supported; use {MEMORY_URL} or a file",
            config.url
        )));
    }

    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;

    info!(url = %config.url, "Database ready");
    Ok(pool)
}

/// In-memory database for tests and dry runs.
///
/// Every SQLite connection to `:memory:` is a separate database, so the pool
/// is pinned to a single connection that never expires.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(MEMORY_URL)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply pending schema migrations
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn is_memory_url(url: &str) -> bool {
    url == MEMORY_URL || url == "sqlite://:memory:"
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_in_memory_schema() {
        let pool = connect_in_memory().await.unwrap();
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name IN \
             ('raw_records', 'load_state', 'curated_records', 'pipeline_cursors')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let count: i64 = row.get("count");
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("pipeline.db").display()),
            ..DatabaseConfig::default()
        };
        let pool = connect(&config).await.unwrap();
        migrate(&pool).await.unwrap();
        assert!(dir.path().join("pipeline.db").exists());
    }

    #[test]
    fn test_memory_url_detection() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://:memory:"));
        assert!(!is_memory_url("sqlite://file:test?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://logpipe.db"));
    }

    #[tokio::test]
    async fn test_named_memory_database_rejected() {
        let config = DatabaseConfig {
            url: "sqlite://file:shared?mode=memory&cache=shared".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(connect(&config).await, Err(PipelineError::Config(_))));
    }
}
