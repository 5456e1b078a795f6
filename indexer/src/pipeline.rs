//! Staged reader, normalizer and publisher pipeline.

use std::sync::Arc;

use config::shared::PipelineConfig;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{IndexerError, IndexerResult};
use crate::index::IndexClient;
use crate::index::document::{DocumentMapper, MappingContext};
use crate::index::writer::{BulkIndexWriter, BulkWriteStats};
use crate::normalizer::EntityNormalizer;
use crate::source::ChangeSource;
use crate::workers::base::{IndexingTotals, RunCounters, StageFlags, StageKind};
use crate::workers::normalizer::run_normalizer;
use crate::workers::publisher::{DocumentPublisher, run_publisher};
use crate::workers::reader::{PipelineInput, ReaderSettings, run_reader};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub totals: IndexingTotals,
    pub bulk: BulkWriteStats,
    /// True when the reader stopped early on a shutdown request.
    pub interrupted: bool,
}

/// Runs the reader, normalizer and publisher concurrently over two bounded queues.
///
/// Each stage sets its done flag when it returns, fails or panics. A stage ends when its input
/// queue is closed and drained, so downstream stages finish whatever upstream already queued.
/// Once every stage is done the bulk writer is closed, which waits for all acknowledgements.
#[derive(Debug)]
pub struct StagedIndexingPipeline<S, N, M, I> {
    job: String,
    source: S,
    normalizer: Arc<N>,
    mapper: Arc<M>,
    writer: BulkIndexWriter<I>,
    config: PipelineConfig,
    context: MappingContext,
    flags: StageFlags,
}

impl<S, N, M, I> StagedIndexingPipeline<S, N, M, I>
where
    S: ChangeSource + Send + Sync + 'static,
    N: EntityNormalizer<S::Row>,
    M: DocumentMapper<N::Entity>,
    I: IndexClient + Send + Sync + 'static,
{
    pub fn new(
        job: impl Into<String>,
        source: S,
        normalizer: Arc<N>,
        mapper: Arc<M>,
        writer: BulkIndexWriter<I>,
        config: PipelineConfig,
        context: MappingContext,
    ) -> Self {
        Self {
            job: job.into(),
            source,
            normalizer,
            mapper,
            writer,
            config,
            context,
            flags: StageFlags::default(),
        }
    }

    /// Returns the done flags of the stages.
    pub fn flags(&self) -> StageFlags {
        self.flags.clone()
    }

    /// Indexes every row of `input`.
    pub async fn run(
        self,
        input: PipelineInput,
        shutdown: ShutdownRx,
    ) -> IndexerResult<PipelineReport> {
        info!(job = %self.job, %input, index = %self.writer.index(), "pipeline started");

        let (rows_tx, rows_rx) = mpsc::channel(self.config.reader_queue_capacity.max(1));
        let (entities_tx, entities_rx) =
            mpsc::channel(self.config.normalizer_queue_capacity.max(1));
        let counters = Arc::new(RunCounters::default());

        let reader = tokio::spawn(run_reader(
            self.source,
            input,
            rows_tx,
            shutdown,
            ReaderSettings {
                job: self.job.clone(),
                log_every: self.config.log_every,
            },
            counters.clone(),
            self.flags.reader.guard(),
        ));

        let normalizer = tokio::spawn(run_normalizer(
            self.job.clone(),
            self.normalizer,
            rows_rx,
            entities_tx,
            counters.clone(),
            self.flags.normalizer.guard(),
        ));

        let publisher = DocumentPublisher::new(
            self.job.clone(),
            self.mapper,
            self.writer.clone(),
            self.context,
            self.config.on_serialization_failure,
            counters.clone(),
        );
        let publisher = tokio::spawn(run_publisher(
            publisher,
            entities_rx,
            self.flags.publisher.guard(),
        ));

        let mut errors: Vec<IndexerError> = Vec::new();
        let mut interrupted = false;

        match reader.await {
            Ok(Ok(ShutdownResult::Ok(_))) => {}
            Ok(Ok(ShutdownResult::Shutdown(_))) => interrupted = true,
            Ok(Err(err)) => errors.push(err),
            Err(err) => errors.push(StageKind::Reader.join_error(err)),
        }

        match normalizer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(err) => errors.push(StageKind::Normalizer.join_error(err)),
        }

        match publisher.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(err) => errors.push(StageKind::Publisher.join_error(err)),
        }

        debug_assert!(self.flags.all_done());

        let bulk = match self.writer.close().await {
            Ok(stats) => stats,
            Err(err) => {
                errors.push(err);
                self.writer.stats()
            }
        };

        let totals = counters.totals();
        if !errors.is_empty() {
            error!(
                job = %self.job,
                rows = totals.rows_read,
                published = totals.documents_published,
                errors = errors.len(),
                "pipeline failed"
            );

            return Err(errors.into());
        }

        info!(
            job = %self.job,
            rows = totals.rows_read,
            entities = totals.entities_normalized,
            published = totals.documents_published,
            skipped = totals.documents_skipped,
            interrupted,
            "pipeline finished"
        );

        Ok(PipelineReport {
            totals,
            bulk,
            interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use config::shared::{BulkConfig, SerializationFailurePolicy};

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::error::ErrorKind;
    use crate::index::memory::MemoryIndex;
    use crate::source::memory::MemoryChangeSource;
    use crate::test_utils::person::{PersonMapper, PersonNormalizer, PersonRow, base_time};
    use crate::types::IdRange;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            reader_queue_capacity: 4,
            normalizer_queue_capacity: 2,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(
        source: MemoryChangeSource<PersonRow>,
        index: &MemoryIndex,
        config: PipelineConfig,
    ) -> StagedIndexingPipeline<MemoryChangeSource<PersonRow>, PersonNormalizer, PersonMapper, MemoryIndex>
    {
        StagedIndexingPipeline::new(
            "people",
            source,
            Arc::new(PersonNormalizer),
            Arc::new(PersonMapper::new()),
            BulkIndexWriter::new(index.clone(), "people", &BulkConfig::default()),
            config,
            MappingContext::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn indexes_one_document_per_entity() {
        let t = base_time();
        let mut rows = Vec::new();
        for id in 0..50 {
            for value in 0..3 {
                rows.push(PersonRow::new(&format!("{id:03}"), &format!("v{value}"), t));
            }
        }
        let index = MemoryIndex::new();
        let (_tx, rx) = create_shutdown_channel();

        let report = pipeline(MemoryChangeSource::with_rows(rows), &index, small_config())
            .run(PipelineInput::ChangedSince(t), rx)
            .await
            .unwrap();

        assert_eq!(report.totals.rows_read, 150);
        assert_eq!(report.totals.entities_normalized, 50);
        assert_eq!(report.totals.documents_published, 50);
        assert_eq!(report.bulk.actions_acknowledged, 50);
        assert!(!report.interrupted);
        assert_eq!(index.documents("people").await.len(), 50);
    }

    #[tokio::test]
    async fn source_failure_completes_every_stage() {
        let source = MemoryChangeSource::with_rows(vec![PersonRow::new("001", "v", base_time())]);
        source.mark_unreadable("001").await;
        let index = MemoryIndex::new();
        let (_tx, rx) = create_shutdown_channel();
        let pipeline = pipeline(source, &index, small_config());
        let flags = pipeline.flags();

        let err = pipeline
            .run(PipelineInput::Range(IdRange::unbounded()), rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceReadError);
        assert!(flags.all_done());
    }

    #[tokio::test]
    async fn abort_policy_fails_run() {
        let source = MemoryChangeSource::with_rows(vec![
            PersonRow::new("001", "v", base_time()),
            PersonRow::corrupt("002", base_time()),
        ]);
        let index = MemoryIndex::new();
        let (_tx, rx) = create_shutdown_channel();
        let config = PipelineConfig {
            on_serialization_failure: SerializationFailurePolicy::Abort,
            ..small_config()
        };

        let err = pipeline(source, &index, config)
            .run(PipelineInput::ChangedSince(base_time()), rx)
            .await
            .unwrap_err();

        assert!(err.contains_kind(ErrorKind::DocumentSerializationError));
    }

    #[tokio::test]
    async fn interrupted_run_reports_interruption() {
        let rows = (0..20)
            .map(|id| PersonRow::new(&format!("{id:03}"), "v", base_time()))
            .collect();
        let index = MemoryIndex::new();
        let (tx, rx) = create_shutdown_channel();
        tx.shutdown();

        let report = pipeline(MemoryChangeSource::with_rows(rows), &index, small_config())
            .run(PipelineInput::ChangedSince(base_time()), rx)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.totals.rows_read, 0);
    }
}
