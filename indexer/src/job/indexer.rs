use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::shared::{BulkConfig, JobOptions, PipelineConfig, RunMode};
use metrics::counter;
use tracing::{debug, info};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{IndexerError, IndexerResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{BEFORE_CHECKPOINT_ADVANCE, indexer_fail_point};
use crate::flight::FlightRecordHandle;
use crate::index::IndexClient;
use crate::index::document::{DocumentMapper, MappingContext};
use crate::index::writer::BulkIndexWriter;
use crate::job::progress::RunProgress;
use crate::job::{Job, JobContext, JobOutcome};
use crate::metrics::{INDEXER_CHECKPOINT_ADVANCES_TOTAL, JOB_LABEL};
use crate::normalizer::EntityNormalizer;
use crate::partition::{BucketPartitioner, select_buckets};
use crate::pipeline::StagedIndexingPipeline;
use crate::source::ChangeSource;
use crate::types::IdRange;
use crate::workers::base::{IndexingTotals, RunCounters};
use crate::workers::bucket::{BucketWorkerPool, index_bucket};
use crate::workers::publisher::DocumentPublisher;
use crate::workers::reader::PipelineInput;

/// Static settings of an [`IndexerJob`].
#[derive(Debug, Clone)]
pub struct IndexerJobSettings {
    /// Table or view whose ids are partitioned for full loads.
    pub driver_table: String,
    /// Index written to unless a run overrides it.
    pub index_name: String,
    pub pipeline: PipelineConfig,
    pub bulk: BulkConfig,
}

/// What a load produced, whichever way it ran.
#[derive(Debug, Clone, Copy, Default)]
struct LoadReport {
    totals: IndexingTotals,
    interrupted: bool,
}

/// Indexing job of one entity type.
///
/// The entity type is defined by its change source, normalizer and document mapper. The run
/// mode of [`JobOptions`] picks between an incremental staged run, a bucketed full load of all
/// or some buckets, and a full load into a recreated index. A run that never stored a
/// checkpoint indexes everything through the staged pipeline over a single bucket.
#[derive(Debug)]
pub struct IndexerJob<S, N, M, I, C> {
    name: String,
    source: S,
    normalizer: Arc<N>,
    mapper: Arc<M>,
    client: I,
    checkpoints: C,
    settings: IndexerJobSettings,
}

impl<S, N, M, I, C> IndexerJob<S, N, M, I, C>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    N: EntityNormalizer<S::Row>,
    M: DocumentMapper<N::Entity>,
    I: IndexClient + Clone + Send + Sync + 'static,
    C: CheckpointStore + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        source: S,
        normalizer: N,
        mapper: M,
        client: I,
        checkpoints: C,
        settings: IndexerJobSettings,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            normalizer: Arc::new(normalizer),
            mapper: Arc::new(mapper),
            client,
            checkpoints,
            settings,
        }
    }

    async fn run_staged(
        &self,
        input: PipelineInput,
        writer: BulkIndexWriter<I>,
        context: MappingContext,
        shutdown: ShutdownRx,
        flight: &FlightRecordHandle,
    ) -> IndexerResult<LoadReport> {
        let progress = RunProgress::new(self.name.clone(), flight.clone(), 1);

        let report = StagedIndexingPipeline::new(
            self.name.clone(),
            self.source.clone(),
            self.normalizer.clone(),
            self.mapper.clone(),
            writer,
            self.settings.pipeline.clone(),
            context,
        )
        .run(input, shutdown)
        .await?;

        progress.batch_completed(report.totals.records_processed());

        Ok(LoadReport {
            totals: report.totals,
            interrupted: report.interrupted,
        })
    }

    /// Indexes the table on first run, through the staged pipeline over a single bucket.
    async fn run_auto(
        &self,
        writer: BulkIndexWriter<I>,
        context: MappingContext,
        shutdown: ShutdownRx,
        flight: &FlightRecordHandle,
    ) -> IndexerResult<LoadReport> {
        info!(job = %self.name, "no previous run found, indexing everything");

        let buckets = BucketPartitioner::new(self.source.clone())
            .allocate(1, &self.settings.driver_table)
            .await?;

        let Some(bucket) = buckets.into_iter().next() else {
            info!(job = %self.name, "driver table is empty, nothing to index");
            writer.close().await?;
            return Ok(LoadReport::default());
        };

        self.run_staged(
            PipelineInput::Range(bucket.range()),
            writer,
            context,
            shutdown,
            flight,
        )
        .await
    }

    async fn run_buckets(
        &self,
        options: &JobOptions,
        writer: BulkIndexWriter<I>,
        context: MappingContext,
        shutdown: ShutdownRx,
        flight: &FlightRecordHandle,
    ) -> IndexerResult<LoadReport> {
        let total = options
            .total_buckets
            .unwrap_or(self.settings.pipeline.total_buckets);
        let (start, end) = options.bucket_range(total)?;

        let buckets = BucketPartitioner::new(self.source.clone())
            .allocate(total, &self.settings.driver_table)
            .await?;
        let buckets = select_buckets(buckets, start, end);

        if buckets.is_empty() {
            info!(job = %self.name, start, end, "no bucket to index");
            writer.close().await?;
            return Ok(LoadReport::default());
        }

        let workers = options
            .thread_count
            .unwrap_or(self.settings.pipeline.bucket_workers);
        info!(
            job = %self.name,
            buckets = buckets.len(),
            start,
            end,
            workers,
            "starting bucketed load"
        );

        let counters = Arc::new(RunCounters::default());
        let publisher = DocumentPublisher::new(
            self.name.clone(),
            self.mapper.clone(),
            writer.clone(),
            context,
            self.settings.pipeline.on_serialization_failure,
            counters.clone(),
        );
        let progress = RunProgress::new(self.name.clone(), flight.clone(), buckets.len() as u32);
        let mut pool = BucketWorkerPool::new(workers, shutdown);

        for bucket in buckets {
            let bucket_number = bucket.bucket_number;
            let progress = progress.clone();
            let work = index_bucket(
                self.source.clone(),
                self.normalizer.clone(),
                publisher.clone(),
                bucket,
            );

            let spawned = pool
                .spawn(bucket_number, async move {
                    let report = work.await?;
                    progress.batch_completed(report.entities);
                    Ok(report)
                })
                .await?;

            if !spawned {
                break;
            }
        }

        let waited = pool
            .wait_all(|report| {
                debug!(
                    bucket = report.bucket_number,
                    rows = report.rows,
                    entities = report.entities,
                    "bucket worker finished"
                )
            })
            .await;
        let closed = writer.close().await;

        match (waited, closed) {
            (Ok(_), Ok(_)) => {}
            (Err(waited), Err(closed)) => {
                return Err(IndexerError::from(vec![waited, closed]));
            }
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => return Err(err),
        }

        Ok(LoadReport {
            totals: counters.totals(),
            interrupted: pool.is_interrupted(),
        })
    }

    async fn advance_checkpoint(
        &self,
        to: DateTime<Utc>,
        flight: &FlightRecordHandle,
    ) -> IndexerResult<DateTime<Utc>> {
        #[cfg(feature = "failpoints")]
        indexer_fail_point(BEFORE_CHECKPOINT_ADVANCE)?;

        let stored = self.checkpoints.advance(&self.name, to).await?;
        let stored = stored.last_successful_run_time();

        flight.set_last_checkpoint(stored);
        counter!(INDEXER_CHECKPOINT_ADVANCES_TOTAL, JOB_LABEL => self.name.clone()).increment(1);
        info!(job = %self.name, checkpoint = %stored, "checkpoint advanced");

        Ok(stored)
    }
}

#[async_trait]
impl<S, N, M, I, C> Job for IndexerJob<S, N, M, I, C>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    N: EntityNormalizer<S::Row>,
    M: DocumentMapper<N::Entity>,
    I: IndexClient + Clone + Send + Sync + 'static,
    C: CheckpointStore + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: JobContext) -> IndexerResult<JobOutcome> {
        let JobContext {
            options,
            flight,
            shutdown,
        } = context;
        options.validate()?;

        // Rows changed while this run reads are picked up by the next one.
        let started_at = Utc::now();

        let index = options
            .index_name
            .clone()
            .unwrap_or_else(|| self.settings.index_name.clone());
        if options.mode == RunMode::DropIndex {
            self.client.drop_index(&index).await?;
        }
        self.client.ensure_index(&index).await?;

        let writer = BulkIndexWriter::new(self.client.clone(), index.clone(), &self.settings.bulk);
        let mapping = MappingContext {
            include_restricted: options.include_restricted,
        };

        info!(job = %self.name, mode = ?options.mode, %index, "job run started");

        let (report, covers_everything) = if options.has_id_range() {
            let range = IdRange::new(options.min_id.clone(), options.max_id.clone());
            let report = self
                .run_staged(PipelineInput::Range(range), writer, mapping, shutdown, &flight)
                .await?;

            (report, false)
        } else if options.mode.is_full_load() {
            let report = self
                .run_buckets(&options, writer, mapping, shutdown, &flight)
                .await?;

            (report, options.mode != RunMode::BucketRange)
        } else {
            let checkpoint = match options.last_run_time {
                Some(last_run_time) => Checkpoint::new(last_run_time),
                None => self.checkpoints.read(&self.name).await?,
            };

            let report = if checkpoint.is_never_run(started_at) {
                self.run_auto(writer, mapping, shutdown, &flight).await?
            } else {
                let input = PipelineInput::ChangedSince(checkpoint.last_successful_run_time());
                self.run_staged(input, writer, mapping, shutdown, &flight)
                    .await?
            };

            (report, true)
        };

        let mut outcome = JobOutcome {
            records_processed: report.totals.records_processed(),
            interrupted: report.interrupted,
            checkpoint: None,
        };

        if report.interrupted {
            flight.mark_interrupted();
            info!(job = %self.name, "run interrupted, checkpoint left unchanged");
        } else if covers_everything {
            outcome.checkpoint = Some(self.advance_checkpoint(started_at, &flight).await?);
        }

        Ok(outcome)
    }
}
