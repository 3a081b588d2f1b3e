//! Ingestion watcher/loader
//!
//! `refresh()` lists the staging area, picks every file that is not yet
//! loaded, and loads each one in its own transaction together with its
//! `load_state` transition. Files are processed concurrently with
//! `buffer_unordered`; record order within a file is preserved.
//!
//! A file either loads completely or not at all. Parse failures mark the file
//! failed and later refreshes retry it until `max_file_attempts` is reached.

pub mod parser;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use logpipe_common::checksum::verify_sha256_prefix;
use logpipe_common::{AppendOutcome, FileStatus};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::error::{PipelineError, Result};
use crate::staging::{staged_digest, StagedFileInfo, StagingArea};
use crate::store::{LoadState, LoadStateStore, LoadSummary, RawStore};

/// Why a file was not loaded this round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_id: String,
    pub error: String,
}

/// Aggregate result of one `refresh()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshReport {
    pub files_listed: usize,
    pub files_loaded: usize,
    pub files_failed: usize,
    /// Failed files that exhausted their attempts
    pub files_skipped: usize,
    pub records_loaded: usize,
    /// Records rejected by the raw dedup key
    pub duplicate_records: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
    pub duration_seconds: f64,
}

impl RefreshReport {
    pub fn is_noop(&self) -> bool {
        self.files_loaded == 0 && self.files_failed == 0
    }
}

#[derive(Debug)]
enum FileOutcome {
    Loaded { records: usize, duplicates: usize },
    Failed(FileFailure),
    /// Another worker committed the file first
    AlreadyLoaded,
    Cancelled,
}

pub struct IngestionLoader {
    area: Arc<dyn StagingArea>,
    pool: SqlitePool,
    load_state: LoadStateStore,
    config: LoaderConfig,
}

impl IngestionLoader {
    pub fn new(area: Arc<dyn StagingArea>, pool: SqlitePool, config: LoaderConfig) -> Self {
        Self {
            area,
            load_state: LoadStateStore::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Load every staged file that is not yet loaded.
    ///
    /// Aborts with [`PipelineError::StagingUnavailable`] before touching any
    /// state when the staging area cannot be listed.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        let start = Instant::now();
        let files = self.area.list().await?;

        let states: HashMap<String, LoadState> = self
            .load_state
            .all()
            .await?
            .into_iter()
            .map(|state| (state.source_file_id.clone(), state))
            .collect();

        let mut report = RefreshReport {
            files_listed: files.len(),
            ..RefreshReport::default()
        };

        let mut candidates = Vec::new();
        for file in files {
            match states.get(&file.file_id) {
                Some(state) if state.status == FileStatus::Loaded => {},
                Some(state)
                    if state.status == FileStatus::Failed
                        && state.attempts >= i64::from(self.config.max_file_attempts) =>
                {
                    debug!(
                        file_id = %file.file_id,
                        attempts = state.attempts,
                        "Skipping file that exhausted its attempts"
                    );
                    report.files_skipped += 1;
                },
                Some(_) => candidates.push(file),
                None => {
                    self.load_state.mark_pending(&file.file_id).await?;
                    candidates.push(file);
                },
            }
        }

        if candidates.is_empty() {
            debug!(location = %self.area.location(), "No new staged files");
            report.duration_seconds = start.elapsed().as_secs_f64();
            return Ok(report);
        }

        info!(
            files = candidates.len(),
            concurrency = self.config.concurrency,
            location = %self.area.location(),
            "Loading staged files"
        );

        let outcomes: Vec<Result<FileOutcome>> = stream::iter(candidates)
            .map(|file| async move {
                if cancel.is_cancelled() {
                    return Ok(FileOutcome::Cancelled);
                }
                self.load_file(&file).await
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome? {
                FileOutcome::Loaded {
                    records,
                    duplicates,
                } => {
                    report.files_loaded += 1;
                    report.records_loaded += records;
                    report.duplicate_records += duplicates;
                },
                FileOutcome::Failed(failure) => {
                    report.files_failed += 1;
                    report.failures.push(failure);
                },
                FileOutcome::AlreadyLoaded => {},
                FileOutcome::Cancelled => report.cancelled = true,
            }
        }

        report.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            loaded = report.files_loaded,
            failed = report.files_failed,
            skipped = report.files_skipped,
            records = report.records_loaded,
            cancelled = report.cancelled,
            "Refresh complete in {:.2}s",
            report.duration_seconds
        );

        Ok(report)
    }

    async fn load_file(&self, file: &StagedFileInfo) -> Result<FileOutcome> {
        let file_id = file.file_id.as_str();

        let records = match self.read_and_parse(file_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(file_id, error = %e, "Failed to load staged file");
                self.load_state.record_failed(file_id, &e.to_string()).await?;
                return Ok(FileOutcome::Failed(FileFailure {
                    file_id: file_id.to_string(),
                    error: e.to_string(),
                }));
            },
        };

        let ingest_timestamp = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0;
        let mut duplicates = 0;
        for (position, payload) in records.iter().enumerate() {
            let outcome =
                RawStore::insert(&mut tx, ingest_timestamp, file_id, position as i64, payload)
                    .await?;
            match outcome {
                AppendOutcome::Inserted(_) => inserted += 1,
                AppendOutcome::DuplicateKeyRejected => duplicates += 1,
            }
        }

        if !LoadStateStore::record_loaded(&mut tx, file_id, records.len() as i64).await? {
            tx.rollback().await?;
            debug!(file_id, "File already loaded by another worker");
            return Ok(FileOutcome::AlreadyLoaded);
        }

        tx.commit().await?;

        if duplicates > 0 {
            warn!(file_id, duplicates, "Raw records already present for file");
        }
        info!(file_id, records = inserted, bytes = file.size_bytes, "Loaded staged file");

        Ok(FileOutcome::Loaded {
            records: inserted,
            duplicates,
        })
    }

    async fn read_and_parse(&self, file_id: &str) -> Result<Vec<serde_json::Value>> {
        let data = self.area.read(file_id).await.map_err(|e| {
            error!(file_id, error = %e, "Failed to read staged file");
            PipelineError::parse_failure(file_id, 0, format!("read failed: {e}"))
        })?;
        if let Some(digest) = staged_digest(file_id) {
            verify_sha256_prefix(&data, digest)
                .map_err(|e| PipelineError::parse_failure(file_id, 0, e))?;
        }
        parser::parse_records(file_id, &data)
    }

    /// Status of one file; files never seen are pending
    pub async fn status(&self, file_id: &str) -> Result<FileStatus> {
        self.load_state.status(file_id).await
    }

    /// Records committed by loaded files
    pub async fn loaded_record_count(&self) -> Result<i64> {
        self.load_state.loaded_record_count().await
    }

    pub async fn load_states(&self) -> Result<Vec<LoadState>> {
        self.load_state.all().await
    }

    /// File counts per status
    pub async fn summary(&self) -> Result<LoadSummary> {
        self.load_state.summary().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::staging::LocalStagingArea;

    async fn loader(dir: &std::path::Path, max_attempts: u32) -> (IngestionLoader, SqlitePool) {
        let pool = connect_in_memory().await.unwrap();
        let config = LoaderConfig {
            concurrency: 2,
            max_file_attempts: max_attempts,
        };
        let loader = IngestionLoader::new(Arc::new(LocalStagingArea::new(dir)), pool.clone(), config);
        (loader, pool)
    }

    #[tokio::test]
    async fn test_refresh_loads_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "{\"n\":0}\n{\"n\":1}\n").unwrap();
        std::fs::write(dir.path().join("b.json"), "[{\"n\":0}]").unwrap();
        let (loader, pool) = loader(dir.path(), 3).await;
        let cancel = CancellationToken::new();

        let first = loader.refresh(&cancel).await.unwrap();
        assert_eq!(first.files_loaded, 2);
        assert_eq!(first.records_loaded, 3);

        let second = loader.refresh(&cancel).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.files_listed, 2);

        assert_eq!(RawStore::new(pool).count().await.unwrap(), 3);
        assert_eq!(loader.loaded_record_count().await.unwrap(), 3);
        assert_eq!(loader.status("a.jsonl").await.unwrap(), FileStatus::Loaded);
        assert_eq!(loader.summary().await.unwrap().loaded, 2);
    }

    #[tokio::test]
    async fn test_malformed_file_retried_until_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.jsonl"), "{\"n\":0}\nnope\n").unwrap();
        let (loader, pool) = loader(dir.path(), 2).await;
        let cancel = CancellationToken::new();

        let first = loader.refresh(&cancel).await.unwrap();
        assert_eq!(first.files_failed, 1);
        assert_eq!(first.failures[0].file_id, "bad.jsonl");
        assert_eq!(loader.status("bad.jsonl").await.unwrap(), FileStatus::Failed);

        let second = loader.refresh(&cancel).await.unwrap();
        assert_eq!(second.files_failed, 1);

        let third = loader.refresh(&cancel).await.unwrap();
        assert_eq!(third.files_failed, 0);
        assert_eq!(third.files_skipped, 1);

        assert_eq!(RawStore::new(pool).count().await.unwrap(), 0);
        let states = loader.load_states().await.unwrap();
        assert_eq!(states[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_fixed_file_loads_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.jsonl");
        std::fs::write(&path, "garbage\n").unwrap();
        let (loader, _pool) = loader(dir.path(), 3).await;
        let cancel = CancellationToken::new();

        loader.refresh(&cancel).await.unwrap();
        std::fs::write(&path, "{\"n\":0}\n").unwrap();

        let report = loader.refresh(&cancel).await.unwrap();
        assert_eq!(report.files_loaded, 1);
        assert_eq!(loader.status("fix.jsonl").await.unwrap(), FileStatus::Loaded);
    }

    #[tokio::test]
    async fn test_digest_mismatch_marks_file_failed() {
        let dir = tempfile::tempdir().unwrap();
        let good = "{\"n\":0}\n";
        let digest = &logpipe_common::checksum::sha256_hex(good.as_bytes())[..12];
        std::fs::write(
            dir.path().join(format!("events-1700000000000-000000-{digest}.jsonl")),
            good,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(format!("events-1700000000000-000001-{digest}.jsonl")),
            "{\"n\":1}\n",
        )
        .unwrap();
        let (loader, pool) = loader(dir.path(), 3).await;

        let report = loader.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.files_loaded, 1);
        assert_eq!(report.files_failed, 1);
        assert!(report.failures[0].file_id.contains("-000001-"));
        assert!(report.failures[0].error.contains("Checksum mismatch"));
        assert_eq!(RawStore::new(pool).count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unseen_file_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (loader, _pool) = loader(dir.path(), 3).await;
        assert_eq!(loader.status("later.jsonl").await.unwrap(), FileStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_staging_dir_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (loader, _pool) = loader(&dir.path().join("gone"), 3).await;

        let err = loader.refresh(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::StagingUnavailable { .. }));
        assert!(loader.load_states().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_refresh_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "{\"n\":0}\n").unwrap();
        let (loader, pool) = loader(dir.path(), 3).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = loader.refresh(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.files_loaded, 0);
        assert_eq!(RawStore::new(pool).count().await.unwrap(), 0);
        assert_eq!(loader.status("a.jsonl").await.unwrap(), FileStatus::Pending);
    }
}
