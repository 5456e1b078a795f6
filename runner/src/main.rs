//! Indexer service binary.
//!
//! Loads the configuration, wires the person job to Postgres, the search index and the
//! checkpoint directory, then either runs one job on demand or keeps the configured triggers
//! running until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use config::load::load_indexer_config;
use config::shared::{IndexerConfig, JobOptions, RunMode};
use indexer::checkpoint::file::FileCheckpointStore;
use indexer::index::elasticsearch::ElasticsearchClient;
use indexer::job::{IndexerJob, IndexerJobSettings};
use indexer::reference::{PgReferenceDataLoader, ReferenceDataCache};
use indexer::scheduler::{JobScheduler, TriggerSpec};
use indexer::source::postgres::{PgChangeSource, connect_source_pool};
use telemetry::tracing::init_tracing;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

use crate::person::{
    PERSON_JOB, PersonDocumentMapper, PersonViewNormalizer, PersonViewRow, person_queries,
};

mod person;

const SYSTEM_CODES_QUERY: &str =
    "select id, category, short_description from system_code order by id";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run this job once and exit instead of running the configured triggers
    #[arg(long)]
    run: Option<String>,
    #[arg(long, value_enum, default_value = "incremental")]
    mode: Mode,
    /// Number of buckets of a full load
    #[arg(long)]
    total_buckets: Option<u32>,
    /// First bucket of a bucket range load, starting at 1
    #[arg(long)]
    start_bucket: Option<u32>,
    /// Last bucket of a bucket range load, inclusive
    #[arg(long)]
    end_bucket: Option<u32>,
    /// Number of concurrent bucket workers
    #[arg(long)]
    thread_count: Option<usize>,
    #[arg(long)]
    min_id: Option<String>,
    #[arg(long)]
    max_id: Option<String>,
    /// Index sealed records instead of deleting them
    #[arg(long)]
    include_restricted: bool,
    /// Write to this index instead of the configured one
    #[arg(long)]
    index_name: Option<String>,
    /// Use this RFC 3339 timestamp instead of the stored checkpoint
    #[arg(long)]
    last_run_time: Option<DateTime<Utc>>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Incremental,
    Full,
    BucketRange,
    DropIndex,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Incremental => RunMode::Incremental,
            Mode::Full => RunMode::Full,
            Mode::BucketRange => RunMode::BucketRange,
            Mode::DropIndex => RunMode::DropIndex,
        }
    }
}

impl Args {
    fn job_options(&self) -> JobOptions {
        JobOptions {
            mode: self.mode.into(),
            total_buckets: self.total_buckets,
            start_bucket: self.start_bucket,
            end_bucket: self.end_bucket,
            thread_count: self.thread_count,
            min_id: self.min_id.clone(),
            max_id: self.max_id.clone(),
            include_restricted: self.include_restricted,
            index_name: self.index_name.clone(),
            last_run_time: self.last_run_time,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_indexer_config().context("failed to load configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    build_runtime(args.thread_count)?.block_on(async_main(config, args))
}

/// Builds the runtime, with one worker per bucket thread when a thread count is given.
fn build_runtime(thread_count: Option<usize>) -> std::io::Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = thread_count {
        builder.worker_threads(threads);
    }

    builder.enable_all().build()
}

async fn async_main(config: IndexerConfig, args: Args) -> anyhow::Result<()> {
    let pool = connect_source_pool(&config.source).await?;

    let reference_data =
        ReferenceDataCache::new(PgReferenceDataLoader::new(pool.clone(), SYSTEM_CODES_QUERY));
    let scheduler = JobScheduler::new(&config.scheduler, Some(reference_data.clone()));

    let person_job = IndexerJob::new(
        PERSON_JOB,
        PgChangeSource::<PersonViewRow>::new(pool.clone(), person_queries()),
        PersonViewNormalizer,
        PersonDocumentMapper::new(reference_data),
        ElasticsearchClient::new(&config.index)?,
        FileCheckpointStore::new(config.checkpoint.directory.clone()),
        IndexerJobSettings {
            driver_table: config.source.driver_table.clone(),
            index_name: config.index.index_name.clone(),
            pipeline: config.pipeline.clone(),
            bulk: config.bulk.clone(),
        },
    );
    scheduler.register_job(Arc::new(person_job))?;

    scheduler.start().await?;

    if let Some(job) = &args.run {
        let record = scheduler.run_scheduled_job(job, args.job_options()).await?;
        info!(
            job = %record.job,
            status = %record.status,
            records = record.records_processed,
            interrupted = record.interrupted,
            "run finished"
        );
        scheduler.stop(true).await;

        if let Some(err) = record.error {
            anyhow::bail!("job {job} failed: {err}");
        }

        return Ok(());
    }

    for trigger in &config.jobs {
        if !trigger.enabled {
            warn!(job = %trigger.name, "trigger disabled in configuration");
            continue;
        }

        scheduler
            .schedule_job(&trigger.name, TriggerSpec::from(trigger))
            .await?;
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c, stopping");
    }

    info!("ctrl-c received, waiting for running jobs");
    scheduler.stop(true).await;

    Ok(())
}
