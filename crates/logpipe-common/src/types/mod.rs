//! Domain types shared by the stores and the loader

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Ingestion status of a staged file (maps to the `load_state.status` column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Visible in the staging area but not yet loaded
    #[default]
    Pending,
    /// All records committed to the raw store
    Loaded,
    /// Last attempt failed; no records were committed
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Loaded => "loaded",
            FileStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for FileStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "loaded" => Ok(FileStatus::Loaded),
            "failed" => Ok(FileStatus::Failed),
            other => Err(CommonError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an append against a store with a uniqueness constraint.
///
/// A collision on the dedup key is a success-equivalent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Row written; carries the store-assigned id
    Inserted(i64),
    /// Dedup key already present; nothing written
    DuplicateKeyRejected,
}

impl AppendOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted(_))
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            AppendOutcome::Inserted(id) => Some(*id),
            AppendOutcome::DuplicateKeyRejected => None,
        }
    }
}
