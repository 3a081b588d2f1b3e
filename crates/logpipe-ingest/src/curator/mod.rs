//! Curator: deterministic raw -> curated projection
//!
//! Raw records are read in pages of ascending id. Each page is split into runs
//! of consecutive records from the same source file. Runs are projected
//! concurrently on the blocking pool, then committed in page order, one
//! transaction each, so curated rows are appended in ingestion order.
//!
//! In cursor mode the persisted high-water mark moves only after every run of
//! the page has committed; the lineage constraint on `raw_record_id` makes
//! replays and overlapping runs no-ops.

pub mod extract;

pub use extract::FieldPaths;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use logpipe_common::AppendOutcome;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CuratorConfig;
use crate::error::{PipelineError, Result};
use crate::store::{CuratedStore, CursorStore, NewCuratedRecord, RawRecord, RawStore};

/// Cursor row owned by the curator
pub const CURSOR_NAME: &str = "curator";

/// Where a curation run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurateFrom {
    /// Resume after the persisted high-water mark
    Cursor,
    /// Replay every raw record ingested at or after the timestamp.
    /// The persisted cursor is left untouched.
    Since(DateTime<Utc>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurateReport {
    pub pages: usize,
    pub records_scanned: usize,
    pub records_curated: usize,
    /// Records already curated by an earlier run
    pub duplicates: usize,
    /// Records with no extractable field
    pub records_skipped: usize,
    /// NULL columns across curated records
    pub null_fields: usize,
    /// Highest raw record id processed by this run
    pub last_raw_record_id: i64,
    pub cancelled: bool,
    pub duration_seconds: f64,
}

#[derive(Debug, Default)]
struct PartitionStats {
    curated: usize,
    duplicates: usize,
    skipped: usize,
    null_fields: usize,
}

pub struct Curator {
    pool: SqlitePool,
    raw: RawStore,
    cursors: CursorStore,
    fields: Arc<FieldPaths>,
    config: CuratorConfig,
}

impl Curator {
    pub fn new(pool: SqlitePool, config: CuratorConfig) -> Self {
        Self {
            raw: RawStore::new(pool.clone()),
            cursors: CursorStore::new(pool.clone()),
            fields: Arc::new(config.fields.clone()),
            pool,
            config,
        }
    }

    /// Current high-water mark
    pub async fn cursor(&self) -> Result<i64> {
        self.cursors.get(CURSOR_NAME).await
    }

    pub async fn curate(&self, from: CurateFrom, cancel: &CancellationToken) -> Result<CurateReport> {
        let start = Instant::now();
        let (mut after_id, since) = match from {
            CurateFrom::Cursor => (self.cursors.get(CURSOR_NAME).await?, None),
            CurateFrom::Since(ts) => (0, Some(ts)),
        };

        info!(after_id, since = ?since, "Starting curation");

        let mut report = CurateReport {
            last_raw_record_id: after_id,
            ..CurateReport::default()
        };

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = self.raw.scan_page(after_id, since, self.config.page_size).await?;
            let Some(last_id) = page.last().map(|record| record.id) else {
                break;
            };
            let page_len = page.len();

            let stats = self.curate_page(page).await?;
            report.pages += 1;
            report.records_scanned += page_len;
            report.records_curated += stats.curated;
            report.duplicates += stats.duplicates;
            report.records_skipped += stats.skipped;
            report.null_fields += stats.null_fields;

            if from == CurateFrom::Cursor {
                self.cursors.advance(CURSOR_NAME, last_id).await?;
            }
            after_id = last_id;
            report.last_raw_record_id = last_id;

            debug!(page = report.pages, records = page_len, last_id, "Curated page");

            if (page_len as i64) < self.config.page_size {
                break;
            }
        }

        report.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            scanned = report.records_scanned,
            curated = report.records_curated,
            duplicates = report.duplicates,
            skipped = report.records_skipped,
            cancelled = report.cancelled,
            "Curation complete in {:.2}s",
            report.duration_seconds
        );

        Ok(report)
    }

    async fn curate_page(&self, page: Vec<RawRecord>) -> Result<PartitionStats> {
        let partitions = partition_by_source(page);

        let projected: Vec<Result<ProjectedPartition>> = stream::iter(partitions)
            .map(|records| {
                let fields = Arc::clone(&self.fields);
                async move {
                    tokio::task::spawn_blocking(move || project_partition(&fields, records))
                        .await
                        .map_err(PipelineError::from)
                }
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        // Commit in page order so curated ids follow raw ids
        let mut total = PartitionStats::default();
        for partition in projected {
            let partition = partition?;
            total.skipped += partition.skipped;
            self.write_partition(&partition.rows, &mut total).await?;
        }
        Ok(total)
    }

    async fn write_partition(&self, rows: &[NewCuratedRecord], stats: &mut PartitionStats) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            match CuratedStore::insert(&mut tx, row).await? {
                AppendOutcome::Inserted(_) => {
                    stats.curated += 1;
                    stats.null_fields += row.fields.null_count();
                },
                AppendOutcome::DuplicateKeyRejected => stats.duplicates += 1,
            }
        }
        tx.commit().await?;

        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProjectedPartition {
    rows: Vec<NewCuratedRecord>,
    skipped: usize,
}

/// Split a page into runs of consecutive records from the same source file
fn partition_by_source(page: Vec<RawRecord>) -> Vec<Vec<RawRecord>> {
    let mut partitions: Vec<Vec<RawRecord>> = Vec::new();
    for record in page {
        match partitions.last_mut() {
            Some(run) if run.last().is_some_and(|r| r.source_file_id == record.source_file_id) => {
                run.push(record)
            },
            _ => partitions.push(vec![record]),
        }
    }
    partitions
}

fn project_partition(fields: &FieldPaths, records: Vec<RawRecord>) -> ProjectedPartition {
    let mut partition = ProjectedPartition::default();
    for record in records {
        let projected = fields.project(&record.payload);
        if projected.is_empty() {
            debug!(raw_record_id = record.id, "No extractable fields, skipping");
            partition.skipped += 1;
            continue;
        }
        partition.rows.push(NewCuratedRecord {
            raw_record_id: record.id,
            source_file_id: record.source_file_id,
            position_in_file: record.position_in_file,
            fields: projected,
        });
    }
    partition
}
