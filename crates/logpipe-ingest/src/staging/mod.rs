//! Staging area: where staged files wait to be loaded
//!
//! The loader only depends on the [`StagingArea`] trait; [`LocalStagingArea`]
//! keeps files in a directory on disk.

pub mod local;

pub use local::LocalStagingArea;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Suffix used for in-flight writes; never listed
pub const TEMP_SUFFIX: &str = ".tmp";

/// Hex characters of the content digest carried in stager-named files
pub const DIGEST_PREFIX_LEN: usize = 12;

/// A published file as seen by `list()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFileInfo {
    pub file_id: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// Storage backend for staged files
#[async_trait]
pub trait StagingArea: Send + Sync {
    /// Human-readable location, used in errors and logs
    fn location(&self) -> String;

    /// Published files, sorted by identifier. Temporary files are excluded.
    async fn list(&self) -> Result<Vec<StagedFileInfo>>;

    /// Full contents of a published file
    async fn read(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Make `bytes` visible under `file_id` atomically.
    ///
    /// Fails with [`PipelineError::AlreadyStaged`] if the identifier is taken.
    async fn publish(&self, file_id: &str, bytes: &[u8]) -> Result<()>;
}

/// Whether a directory entry name is an in-flight or hidden file
pub fn is_temporary(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(TEMP_SUFFIX)
}

/// Staged file identifiers are plain, visible file names
pub fn validate_file_id(file_id: &str) -> Result<()> {
    if file_id.is_empty()
        || file_id.contains(['/', '\\', '\0'])
        || file_id == ".."
        || is_temporary(file_id)
    {
        return Err(PipelineError::InvalidFileId(file_id.to_string()));
    }
    Ok(())
}

/// Content digest prefix embedded in a stager-named file identifier.
///
/// Names of the form `{prefix}-{millis}-{seq:06}-{digest}.{ext}` yield the
/// digest; any other name yields `None` and is loaded unverified.
pub fn staged_digest(file_id: &str) -> Option<&str> {
    let (head, tail) = file_id.rsplit_once('-')?;
    let digest = tail.split('.').next()?;
    let mut parts = head.rsplitn(3, '-');
    let seq = parts.next()?;
    let millis = parts.next()?;
    let prefix = parts.next()?;

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let well_formed = !prefix.is_empty()
        && is_digits(millis)
        && seq.len() == 6
        && is_digits(seq)
        && digest.len() == DIGEST_PREFIX_LEN
        && digest.bytes().all(|b| b.is_ascii_hexdigit());

    well_formed.then_some(digest)
}
