//! logpipe - file-triggered log ingestion and curation

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use logpipe_common::logging::{init_logging, LogConfig, LogLevel};
use logpipe_ingest::adapter::{AdapterRunner, HttpAdapter, LabelSet};
use logpipe_ingest::config::PipelineConfig;
use logpipe_ingest::curator::{CurateFrom, Curator};
use logpipe_ingest::db;
use logpipe_ingest::loader::IngestionLoader;
use logpipe_ingest::orchestrator::PipelineOrchestrator;
use logpipe_ingest::stager::FileStager;
use logpipe_ingest::staging::LocalStagingArea;
use logpipe_ingest::store::{
    CuratedRecord, CuratedStore, GroupField, LoadState, LoadSummary, RawStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "logpipe")]
#[command(author, version, about = "File-triggered log ingestion and curation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Database URL (sqlite://path or sqlite::memory:)
    #[arg(long, global = true, env = "LOGPIPE_DATABASE_URL")]
    database_url: Option<String>,

    /// Staging directory
    #[arg(long, global = true, env = "LOGPIPE_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage a JSON Lines file of events into the staging area
    Stage {
        /// Input file, one JSON event per line
        #[arg(short, long)]
        input: PathBuf,

        /// Records per staged file
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Staged file name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Gzip staged files
        #[arg(long)]
        compress: bool,
    },

    /// Load staged files that are not loaded yet
    Refresh,

    /// Project raw records into the curated store
    Curate {
        /// Replay raw records ingested at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Show load state
    Status {
        /// Single staged file identifier
        #[arg(long)]
        file: Option<String>,
    },

    /// Refresh and curate on an interval until Ctrl-C
    Watch {
        /// Seconds between cycles
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Classify curated records (or one text) against a label set
    Classify {
        /// Comma-separated labels
        #[arg(short, long, value_delimiter = ',', required = true)]
        labels: Vec<String>,

        /// Classify this text instead of curated records
        #[arg(long)]
        text: Option<String>,

        /// Maximum curated records to classify
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Summarize curated records, globally or per group
    Summarize {
        /// Group by service, level, event_type, or host
        #[arg(long)]
        group_by: Option<GroupField>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("logpipe")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(dir) = cli.staging_dir {
        config.staging.dir = dir;
    }

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Command::Stage {
            input,
            batch_size,
            prefix,
            compress,
        } => {
            if let Some(prefix) = prefix {
                config.staging.file_prefix = prefix;
            }
            config.staging.compress |= compress;
            config.validate()?;

            let area = LocalStagingArea::new(&config.staging.dir);
            area.ensure_exists().await?;
            let stager = FileStager::from_config(Arc::new(area), &config.staging);

            let batch_size = batch_size.unwrap_or(config.staging.batch_size);
            let staged = stager.stage_file(&input, batch_size).await?;
            info!(files = staged.len(), input = %input.display(), "Staging complete");
            print_json(&staged)?;
        },

        Command::Refresh => {
            config.validate()?;
            let pool = db::connect(&config.database).await?;
            let loader = IngestionLoader::new(
                Arc::new(LocalStagingArea::new(&config.staging.dir)),
                pool,
                config.loader.clone(),
            );
            print_json(&loader.refresh(&cancel).await?)?;
        },

        Command::Curate { since } => {
            config.validate()?;
            let pool = db::connect(&config.database).await?;
            let curator = Curator::new(pool, config.curator.clone());
            let from = since.map_or(CurateFrom::Cursor, CurateFrom::Since);
            print_json(&curator.curate(from, &cancel).await?)?;
        },

        Command::Status { file } => {
            config.validate()?;
            let pool = db::connect(&config.database).await?;
            let loader = IngestionLoader::new(
                Arc::new(LocalStagingArea::new(&config.staging.dir)),
                pool.clone(),
                config.loader.clone(),
            );

            match file {
                Some(file_id) => {
                    let status = loader.status(&file_id).await?;
                    println!("{file_id}: {status}");
                },
                None => {
                    print_json(&StatusOutput {
                        summary: loader.summary().await?,
                        files: loader.load_states().await?,
                        loaded_records: loader.loaded_record_count().await?,
                        raw_records: RawStore::new(pool.clone()).count().await?,
                        curated_records: CuratedStore::new(pool).count().await?,
                    })?;
                },
            }
        },

        Command::Watch { interval_secs } => {
            if let Some(secs) = interval_secs {
                config.watch_interval_secs = secs;
            }
            config.validate()?;
            let pool = db::connect(&config.database).await?;
            let orchestrator = PipelineOrchestrator::new(
                Arc::new(LocalStagingArea::new(&config.staging.dir)),
                pool,
                &config,
            );

            let cycles = orchestrator.watch(&cancel).await?;
            info!(cycles, "Watch finished");
        },

        Command::Classify {
            labels,
            text,
            limit,
        } => {
            config.validate()?;
            let labels = LabelSet::new(&labels)?;
            let runner = adapter_runner(&config)?;

            match text {
                Some(text) => {
                    let label = runner.classify_one(&text, &labels, &cancel).await?;
                    println!("{label}");
                },
                None => {
                    let records = curated_records(&config, limit).await?;
                    print_json(&runner.classify_scan(&records, &labels, &cancel).await)?;
                },
            }
        },

        Command::Summarize { group_by } => {
            config.validate()?;
            let runner = adapter_runner(&config)?;
            let records = curated_records(&config, None).await?;

            let report = match group_by {
                Some(field) => runner.summarize_groups(&records, field, &cancel).await,
                None => runner.summarize_all(&records, &cancel).await,
            };
            print_json(&report)?;
        },
    }

    if cancel.is_cancelled() {
        warn!("Interrupted; completed work is committed");
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput {
    summary: LoadSummary,
    files: Vec<LoadState>,
    loaded_records: i64,
    raw_records: i64,
    curated_records: i64,
}

fn adapter_runner(config: &PipelineConfig) -> Result<AdapterRunner> {
    let adapter = HttpAdapter::from_config(&config.adapter)?;
    Ok(AdapterRunner::from_config(Arc::new(adapter), &config.adapter))
}

async fn curated_records(config: &PipelineConfig, limit: Option<i64>) -> Result<Vec<CuratedRecord>> {
    let pool = db::connect(&config.database).await?;
    let store = CuratedStore::new(pool);
    let records = match limit {
        Some(limit) => store.list(0, limit).await?,
        None => store.all().await?,
    };
    Ok(records)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing current unit of work");
            cancel.cancel();
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
