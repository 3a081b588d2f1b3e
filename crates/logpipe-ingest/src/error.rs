//! Error types for the ingestion and curation pipeline
//!
//! Per-file and per-record failures are isolated by the stages and show up in
//! their reports; the variants here are the ones that abort an invocation.

use thiserror::Error;

use crate::adapter::AdapterError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Staging area cannot be listed; nothing was mutated
    #[error("Staging area unavailable at '{location}': {reason}")]
    StagingUnavailable { location: String, reason: String },

    /// A staged file could not be decoded
    #[error("Failed to parse staged file '{file_id}' at record {position}: {reason}")]
    ParseFailure {
        file_id: String,
        position: usize,
        reason: String,
    },

    /// A file with this identifier is already published
    #[error("Staged file already exists: {0}")]
    AlreadyStaged(String),

    #[error("Invalid staged file identifier: '{0}'")]
    InvalidFileId(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] logpipe_common::CommonError),

    /// A stored row no longer decodes into its domain type
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn staging_unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::StagingUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse_failure(file_id: impl Into<String>, position: usize, reason: impl ToString) -> Self {
        Self::ParseFailure {
            file_id: file_id.into(),
            position,
            reason: reason.to_string(),
        }
    }

    pub fn corrupt_row(table: &'static str, reason: impl ToString) -> Self {
        Self::CorruptRow {
            table,
            reason: reason.to_string(),
        }
    }
}
