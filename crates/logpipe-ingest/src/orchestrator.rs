//! Pipeline orchestrator
//!
//! Runs refresh then curate as one cycle, either once or on a fixed interval
//! until cancelled.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::curator::{CurateFrom, CurateReport, Curator};
use crate::error::{PipelineError, Result};
use crate::loader::{IngestionLoader, RefreshReport};
use crate::staging::StagingArea;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub refresh: RefreshReport,
    pub curate: CurateReport,
}

pub struct PipelineOrchestrator {
    loader: IngestionLoader,
    curator: Curator,
    interval: Duration,
}

impl PipelineOrchestrator {
    pub fn new(area: Arc<dyn StagingArea>, pool: SqlitePool, config: &PipelineConfig) -> Self {
        Self {
            loader: IngestionLoader::new(area, pool.clone(), config.loader.clone()),
            curator: Curator::new(pool, config.curator.clone()),
            interval: Duration::from_secs(config.watch_interval_secs),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One refresh followed by a cursor-mode curate
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let refresh = self.loader.refresh(cancel).await?;
        if refresh.cancelled || cancel.is_cancelled() {
            return Ok(CycleReport {
                refresh,
                ..CycleReport::default()
            });
        }

        let curate = self.curator.curate(CurateFrom::Cursor, cancel).await?;
        Ok(CycleReport { refresh, curate })
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A cycle that fails because the staging area is unavailable is logged
    /// and retried next interval; any other error stops the watch.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<usize> {
        info!(interval_secs = self.interval.as_secs(), "Watching staging area");

        let mut cycles = 0;
        loop {
            match self.run_cycle(cancel).await {
                Ok(report) => {
                    cycles += 1;
                    if !report.refresh.is_noop() || report.curate.records_curated > 0 {
                        info!(
                            cycle = cycles,
                            files = report.refresh.files_loaded,
                            curated = report.curate.records_curated,
                            "Cycle complete"
                        );
                    }
                },
                Err(e @ PipelineError::StagingUnavailable { .. }) => {
                    error!(error = %e, "Staging area unavailable, retrying next cycle");
                },
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {},
            }
        }

        info!(cycles, "Watch stopped");
        Ok(cycles)
    }
}
