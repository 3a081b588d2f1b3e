//! Pipeline configuration
//!
//! Values come from `LOGPIPE_*` environment variables (a `.env` file is read
//! first), falling back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::curator::FieldPaths;
use crate::error::{PipelineError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default database location (SQLite file next to the working directory).
pub const DEFAULT_DATABASE_URL: &str = "sqlite://logpipe.db";

/// Default maximum connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default time a writer waits on a locked database, in seconds.
pub const DEFAULT_DATABASE_BUSY_TIMEOUT_SECS: u64 = 10;

/// Default staging directory.
pub const DEFAULT_STAGING_DIR: &str = "./staging";

/// Default staged file name prefix.
pub const DEFAULT_FILE_PREFIX: &str = "events";

/// Default number of records per staged file.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of files loaded in parallel.
pub const DEFAULT_LOAD_CONCURRENCY: usize = 4;

/// Default number of attempts before a failing file is left alone.
pub const DEFAULT_MAX_FILE_ATTEMPTS: u32 = 3;

/// Default raw records read per curation page.
pub const DEFAULT_CURATE_PAGE_SIZE: i64 = 1000;

/// Default number of source-file partitions curated in parallel.
pub const DEFAULT_CURATE_CONCURRENCY: usize = 4;

/// Default hard timeout for a single adapter call, in seconds.
pub const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 30;

/// Default attempts per adapter call (first try included).
pub const DEFAULT_ADAPTER_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff, in milliseconds.
pub const DEFAULT_ADAPTER_BACKOFF_MS: u64 = 500;

/// Default ceiling for the retry backoff, in milliseconds.
pub const DEFAULT_ADAPTER_MAX_BACKOFF_MS: u64 = 10_000;

/// Default number of adapter calls in flight.
pub const DEFAULT_ADAPTER_CONCURRENCY: usize = 4;

/// Default interval between watch cycles, in seconds.
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub staging: StagingConfig,
    pub loader: LoaderConfig,
    pub curator: CuratorConfig,
    pub adapter: AdapterConfig,
    pub watch_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite://path/to/file.db` or `sqlite::memory:`
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub batch_size: usize,
    /// Gzip staged files (`.jsonl.gz`)
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub concurrency: usize,
    pub max_file_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    pub page_size: i64,
    pub concurrency: usize,
    pub fields: FieldPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Base URL of the HTTP summarize/classify service
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub concurrency: usize,
}

impl AdapterConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            busy_timeout_secs: DEFAULT_DATABASE_BUSY_TIMEOUT_SECS,
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_STAGING_DIR),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            compress: false,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_LOAD_CONCURRENCY,
            max_file_attempts: DEFAULT_MAX_FILE_ATTEMPTS,
        }
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_CURATE_PAGE_SIZE,
            concurrency: DEFAULT_CURATE_CONCURRENCY,
            fields: FieldPaths::default(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: DEFAULT_ADAPTER_TIMEOUT_SECS,
            max_attempts: DEFAULT_ADAPTER_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_ADAPTER_BACKOFF_MS,
            max_backoff_ms: DEFAULT_ADAPTER_MAX_BACKOFF_MS,
            concurrency: DEFAULT_ADAPTER_CONCURRENCY,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            staging: StagingConfig::default(),
            loader: LoaderConfig::default(),
            curator: CuratorConfig::default(),
            adapter: AdapterConfig::default(),
            watch_interval_secs: DEFAULT_WATCH_INTERVAL_SECS,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = FieldPaths::default();
        let config = PipelineConfig {
            database: DatabaseConfig {
                url: env_string("LOGPIPE_DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_parse(
                    "LOGPIPE_DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                busy_timeout_secs: env_parse(
                    "LOGPIPE_DATABASE_BUSY_TIMEOUT_SECS",
                    DEFAULT_DATABASE_BUSY_TIMEOUT_SECS,
                ),
            },
            staging: StagingConfig {
                dir: PathBuf::from(env_string("LOGPIPE_STAGING_DIR", DEFAULT_STAGING_DIR)),
                file_prefix: env_string("LOGPIPE_FILE_PREFIX", DEFAULT_FILE_PREFIX),
                batch_size: env_parse("LOGPIPE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                compress: env_parse("LOGPIPE_COMPRESS", false),
            },
            loader: LoaderConfig {
                concurrency: env_parse("LOGPIPE_LOAD_CONCURRENCY", DEFAULT_LOAD_CONCURRENCY),
                max_file_attempts: env_parse("LOGPIPE_MAX_FILE_ATTEMPTS", DEFAULT_MAX_FILE_ATTEMPTS),
            },
            curator: CuratorConfig {
                page_size: env_parse("LOGPIPE_CURATE_PAGE_SIZE", DEFAULT_CURATE_PAGE_SIZE),
                concurrency: env_parse("LOGPIPE_CURATE_CONCURRENCY", DEFAULT_CURATE_CONCURRENCY),
                fields: FieldPaths {
                    time: env_string("LOGPIPE_FIELD_TIME", &defaults.time),
                    service: env_string("LOGPIPE_FIELD_SERVICE", &defaults.service),
                    level: env_string("LOGPIPE_FIELD_LEVEL", &defaults.level),
                    event_type: env_string("LOGPIPE_FIELD_EVENT_TYPE", &defaults.event_type),
                    host: env_string("LOGPIPE_FIELD_HOST", &defaults.host),
                    status_code: env_string("LOGPIPE_FIELD_STATUS_CODE", &defaults.status_code),
                    latency_ms: env_string("LOGPIPE_FIELD_LATENCY_MS", &defaults.latency_ms),
                    message: env_string("LOGPIPE_FIELD_MESSAGE", &defaults.message),
                },
            },
            adapter: AdapterConfig {
                base_url: std::env::var("LOGPIPE_ADAPTER_URL").ok().filter(|s| !s.is_empty()),
                timeout_secs: env_parse("LOGPIPE_ADAPTER_TIMEOUT_SECS", DEFAULT_ADAPTER_TIMEOUT_SECS),
                max_attempts: env_parse("LOGPIPE_ADAPTER_MAX_ATTEMPTS", DEFAULT_ADAPTER_MAX_ATTEMPTS),
                backoff_ms: env_parse("LOGPIPE_ADAPTER_BACKOFF_MS", DEFAULT_ADAPTER_BACKOFF_MS),
                max_backoff_ms: env_parse(
                    "LOGPIPE_ADAPTER_MAX_BACKOFF_MS",
                    DEFAULT_ADAPTER_MAX_BACKOFF_MS,
                ),
                concurrency: env_parse("LOGPIPE_ADAPTER_CONCURRENCY", DEFAULT_ADAPTER_CONCURRENCY),
            },
            watch_interval_secs: env_parse("LOGPIPE_WATCH_INTERVAL_SECS", DEFAULT_WATCH_INTERVAL_SECS),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(PipelineError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(PipelineError::config("Database max_connections must be greater than 0"));
        }

        if self.staging.batch_size == 0 {
            return Err(PipelineError::config("Batch size must be greater than 0"));
        }

        if self.staging.file_prefix.is_empty()
            || self.staging.file_prefix.contains(['/', '\\'])
            || self.staging.file_prefix.starts_with('.')
        {
            return Err(PipelineError::config(format!(
                "Invalid staged file prefix '{}'",
                self.staging.file_prefix
            )));
        }

        if self.loader.concurrency == 0 || self.curator.concurrency == 0 || self.adapter.concurrency == 0
        {
            return Err(PipelineError::config("Concurrency settings must be greater than 0"));
        }

        if self.loader.max_file_attempts == 0 {
            return Err(PipelineError::config("max_file_attempts must be greater than 0"));
        }

        if self.curator.page_size <= 0 {
            return Err(PipelineError::config("Curation page size must be greater than 0"));
        }

        if self.adapter.max_attempts == 0 {
            return Err(PipelineError::config("Adapter max_attempts must be greater than 0"));
        }

        if self.adapter.timeout_secs == 0 {
            return Err(PipelineError::config("Adapter timeout must be greater than 0"));
        }

        if self.watch_interval_secs == 0 {
            return Err(PipelineError::config("Watch interval must be greater than 0"));
        }

        self.curator.fields.validate()?;

        if self.adapter.base_url.is_none() {
            tracing::debug!("No adapter URL configured - classify/summarize are unavailable");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = PipelineConfig::default();
        config.staging.batch_size = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_prefix_with_separator_rejected() {
        let mut config = PipelineConfig::default();
        config.staging.file_prefix = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_field_path_rejected() {
        let mut config = PipelineConfig::default();
        config.curator.fields.message = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = PipelineConfig::default();
        config.adapter.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
