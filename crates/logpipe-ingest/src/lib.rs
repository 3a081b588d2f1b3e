//! logpipe ingestion library
//!
//! File-triggered log ingestion and curation.
//!
//! # Pipeline
//!
//! - **Stager** ([`stager::FileStager`]): event batches to immutable JSON Lines files
//! - **Loader** ([`loader::IngestionLoader`]): exactly-once load of staged files
//!   into the raw store
//! - **Curator** ([`curator::Curator`]): deterministic projection of raw payloads
//!   into the fixed-schema curated store
//! - **Adapter** ([`adapter::AdapterRunner`]): bounded, retrying summarize and
//!   classify calls over curated records
//!
//! # Example
//!
//! ```no_run
//! use logpipe_ingest::{config::PipelineConfig, db, orchestrator::PipelineOrchestrator};
//! use logpipe_ingest::staging::LocalStagingArea;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load()?;
//!     let pool = db::connect(&config.database).await?;
//!     let area = Arc::new(LocalStagingArea::new(&config.staging.dir));
//!
//!     let orchestrator = PipelineOrchestrator::new(area, pool, &config);
//!     let report = orchestrator.run_cycle(&CancellationToken::new()).await?;
//!     println!("loaded {} records", report.refresh.records_loaded);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod adapter;
pub mod config;
pub mod curator;
pub mod db;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod stager;
pub mod staging;
pub mod store;

pub use error::{PipelineError, Result};
