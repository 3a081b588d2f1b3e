//! File stager: serializes event batches into immutable staged files
//!
//! Each batch becomes one JSON Lines file named
//! `{prefix}-{unix_millis}-{seq:06}-{sha256[..12]}.jsonl[.gz]`, published
//! atomically through the [`StagingArea`].

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use logpipe_common::checksum::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StagingConfig;
use crate::error::{PipelineError, Result};
use crate::staging::{StagingArea, DIGEST_PREFIX_LEN};

/// Identifier collisions tolerated before giving up
const MAX_PUBLISH_ATTEMPTS: u32 = 5;

/// Metadata of a published file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub file_id: String,
    pub record_count: usize,
    pub size_bytes: u64,
    /// SHA-256 of the published bytes
    pub sha256: String,
    pub written_at: DateTime<Utc>,
}

pub struct FileStager {
    area: Arc<dyn StagingArea>,
    prefix: String,
    compress: bool,
    seq: AtomicU64,
}

impl FileStager {
    pub fn new(area: Arc<dyn StagingArea>, prefix: impl Into<String>) -> Self {
        Self {
            area,
            prefix: prefix.into(),
            compress: false,
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(area: Arc<dyn StagingArea>, config: &StagingConfig) -> Self {
        Self::new(area, config.file_prefix.clone()).with_compression(config.compress)
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Partition `records` into files of at most `batch_size` records.
    ///
    /// Record order is preserved across and within files. An empty input
    /// stages nothing.
    pub async fn stage(&self, records: &[Value], batch_size: usize) -> Result<Vec<StagedFile>> {
        if batch_size == 0 {
            return Err(PipelineError::config("Batch size must be greater than 0"));
        }

        let mut staged = Vec::with_capacity(records.len().div_ceil(batch_size));
        for batch in records.chunks(batch_size) {
            staged.push(self.stage_batch(batch).await?);
        }

        if !staged.is_empty() {
            info!(
                files = staged.len(),
                records = records.len(),
                location = %self.area.location(),
                "Staged event batches"
            );
        }
        Ok(staged)
    }

    /// Stage an existing JSON Lines file from disk, re-batched by `batch_size`
    pub async fn stage_file(&self, path: &Path, batch_size: usize) -> Result<Vec<StagedFile>> {
        let content = tokio::fs::read_to_string(path).await?;
        let source = path.display().to_string();

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str(line)
                .map_err(|e| PipelineError::parse_failure(source.clone(), line_no, e))?;
            records.push(value);
        }

        self.stage(&records, batch_size).await
    }

    async fn stage_batch(&self, batch: &[Value]) -> Result<StagedFile> {
        let bytes = self.encode(batch)?;
        let sha256 = sha256_hex(&bytes);
        let extension = if self.compress { "jsonl.gz" } else { "jsonl" };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let written_at = Utc::now();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let file_id = format!(
                "{}-{}-{:06}-{}.{}",
                self.prefix,
                written_at.timestamp_millis(),
                seq,
                &sha256[..DIGEST_PREFIX_LEN],
                extension
            );

            match self.area.publish(&file_id, &bytes).await {
                Ok(()) => {
                    debug!(file_id = %file_id, records = batch.len(), "Staged file");
                    return Ok(StagedFile {
                        file_id,
                        record_count: batch.len(),
                        size_bytes: bytes.len() as u64,
                        sha256,
                        written_at,
                    });
                },
                Err(PipelineError::AlreadyStaged(_)) if attempt < MAX_PUBLISH_ATTEMPTS => {
                    debug!(file_id = %file_id, "Identifier taken, retrying with next sequence");
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn encode(&self, batch: &[Value]) -> Result<Vec<u8>> {
        let mut lines = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut lines, record)?;
            lines.push(b'\n');
        }

        if !self.compress {
            return Ok(lines);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&lines)?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::staging::LocalStagingArea;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    fn events(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"time": 1_700_000_000 + i, "n": i})).collect()
    }

    #[tokio::test]
    async fn test_stage_partitions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let area = Arc::new(LocalStagingArea::new(dir.path()));
        let stager = FileStager::new(area.clone(), "events");

        let staged = stager.stage(&events(7), 3).await.unwrap();
        assert_eq!(
            staged.iter().map(|f| f.record_count).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );

        let first = area.read(&staged[0].file_id).await.unwrap();
        let lines: Vec<Value> = String::from_utf8(first)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, events(3));
    }

    #[tokio::test]
    async fn test_file_id_format() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FileStager::new(Arc::new(LocalStagingArea::new(dir.path())), "events");
        let staged = stager.stage(&events(1), 10).await.unwrap();

        let id = &staged[0].file_id;
        let parts: Vec<&str> = id.trim_end_matches(".jsonl").split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "events");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], "000000");
        assert_eq!(parts[3], &staged[0].sha256[..12]);
        assert_eq!(crate::staging::staged_digest(id), Some(parts[3]));
    }

    #[tokio::test]
    async fn test_empty_input_and_zero_batch() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FileStager::new(Arc::new(LocalStagingArea::new(dir.path())), "events");

        assert!(stager.stage(&[], 10).await.unwrap().is_empty());
        assert!(matches!(
            stager.stage(&events(2), 0).await,
            Err(PipelineError::Config(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_compressed_staging() {
        let dir = tempfile::tempdir().unwrap();
        let area = Arc::new(LocalStagingArea::new(dir.path()));
        let stager = FileStager::new(area.clone(), "events").with_compression(true);

        let staged = stager.stage(&events(2), 10).await.unwrap();
        assert!(staged[0].file_id.ends_with(".jsonl.gz"));

        let bytes = area.read(&staged[0].file_id).await.unwrap();
        let mut text = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_stage_file_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.jsonl");
        std::fs::write(&input, "{\"a\":1}\n\n{\"a\":2}\n").unwrap();

        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();
        let stager = FileStager::new(Arc::new(LocalStagingArea::new(&staging)), "imported");

        let staged = stager.stage_file(&input, 100).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].record_count, 2);
    }

    #[tokio::test]
    async fn test_stage_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.jsonl");
        std::fs::write(&input, "{\"a\":1}\nnot json\n").unwrap();

        let stager = FileStager::new(Arc::new(LocalStagingArea::new(dir.path())), "imported");
        assert!(matches!(
            stager.stage_file(&input, 100).await,
            Err(PipelineError::ParseFailure { position: 1, .. })
        ));
    }
}
