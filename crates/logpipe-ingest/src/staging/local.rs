//! Directory-backed staging area

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{is_temporary, validate_file_id, StagedFileInfo, StagingArea, TEMP_SUFFIX};
use crate::error::{PipelineError, Result};

/// Distinguishes temp files of concurrent publishes within one process
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LocalStagingArea {
    dir: PathBuf,
}

impl LocalStagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory if needed (used by the stager, never by the loader)
    pub async fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_of(&self, file_id: &str) -> Result<PathBuf> {
        validate_file_id(file_id)?;
        Ok(self.dir.join(file_id))
    }
}

#[async_trait]
impl StagingArea for LocalStagingArea {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    async fn list(&self) -> Result<Vec<StagedFileInfo>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PipelineError::staging_unavailable(self.location(), e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::staging_unavailable(self.location(), e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            if is_temporary(&name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // removed between read_dir and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(PipelineError::staging_unavailable(self.location(), e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            files.push(StagedFileInfo {
                file_id: name,
                size_bytes: metadata.len(),
                modified_at,
            });
        }

        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        debug!(location = %self.location(), files = files.len(), "Listed staging area");
        Ok(files)
    }

    async fn read(&self, file_id: &str) -> Result<Vec<u8>> {
        let path = self.path_of(file_id)?;
        Ok(fs::read(&path).await?)
    }

    async fn publish(&self, file_id: &str, bytes: &[u8]) -> Result<()> {
        let final_path = self.path_of(file_id)?;
        let temp_path = self.dir.join(format!(
            ".{file_id}.{}-{}{TEMP_SUFFIX}",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let published = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            // Unlike rename, a hard link never replaces an existing file
            fs::hard_link(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %e, "Failed to remove temp file");
            }
        }

        match published {
            Ok(()) => {
                debug!(file_id, bytes = bytes.len(), "Published staged file");
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(PipelineError::AlreadyStaged(file_id.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }
}
