use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::shared::{BulkConfig, RunMode, SerializationFailurePolicy};
use metrics::counter;
use tracing::{error, info, warn};

use crate::bail;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{ErrorKind, IndexerError, IndexerResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{BEFORE_BATCH_LOAD, BEFORE_CHECKPOINT_ADVANCE, indexer_fail_point};
use crate::flight::FlightRecordHandle;
use crate::index::document::{DocumentMapper, MappingContext};
use crate::index::writer::BulkIndexWriter;
use crate::index::{IndexAction, IndexClient};
use crate::job::progress::RunProgress;
use crate::job::tracker::{BatchIterator, ChangeTracker};
use crate::job::{Job, JobContext, JobOutcome};
use crate::metrics::{INDEXER_CHECKPOINT_ADVANCES_TOTAL, JOB_LABEL};
use crate::normalizer::{EntityNormalizer, reduce_all};
use crate::source::ChangeSource;
use crate::types::JobBatch;
use crate::workers::base::RunCounters;
use crate::workers::publisher::DocumentPublisher;

/// Static settings of a [`SavePointJob`].
#[derive(Debug, Clone)]
pub struct SavePointSettings {
    pub index_name: String,
    pub bulk: BulkConfig,
    pub on_serialization_failure: SerializationFailurePolicy,
}

/// Incremental job that advances its checkpoint after every batch.
///
/// A batch is indexed and acknowledged before its timestamp becomes the checkpoint, so a run
/// failing on a batch keeps the progress of the batches before it and the next run resumes
/// after the last advanced checkpoint. Processing stops at the first failing batch.
#[derive(Debug)]
pub struct SavePointJob<T, S, N, M, I, C> {
    name: String,
    tracker: T,
    source: S,
    normalizer: Arc<N>,
    mapper: Arc<M>,
    client: I,
    checkpoints: C,
    settings: SavePointSettings,
}

impl<T, S, N, M, I, C> SavePointJob<T, S, N, M, I, C>
where
    T: ChangeTracker + Send + Sync + 'static,
    S: ChangeSource + Send + Sync + 'static,
    N: EntityNormalizer<S::Row>,
    M: DocumentMapper<N::Entity>,
    I: IndexClient + Clone + Send + Sync + 'static,
    C: CheckpointStore + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        tracker: T,
        source: S,
        normalizer: N,
        mapper: M,
        client: I,
        checkpoints: C,
        settings: SavePointSettings,
    ) -> Self {
        Self {
            name: name.into(),
            tracker,
            source,
            normalizer: Arc::new(normalizer),
            mapper: Arc::new(mapper),
            client,
            checkpoints,
            settings,
        }
    }

    /// Indexes one batch and waits for its acknowledgement, returning the number of actions.
    ///
    /// Every action of the batch is built before the first one reaches the writer, so a batch
    /// that fails to load or map leaves nothing behind in the index.
    async fn process_batch(
        &self,
        batch: &JobBatch,
        publisher: &DocumentPublisher<M, I>,
    ) -> IndexerResult<u64> {
        let (deletes, loads) = batch.split_deletes();

        let mut actions: Vec<IndexAction> = deletes
            .into_iter()
            .map(|id| IndexAction::Delete { id: id.to_string() })
            .collect();

        if !loads.is_empty() {
            #[cfg(feature = "failpoints")]
            indexer_fail_point(BEFORE_BATCH_LOAD)?;

            let rows = self.source.pull_identifiers(&loads).await?;
            publisher.counters().add_rows_read(rows.len() as u64);

            let entities = reduce_all(self.normalizer.as_ref(), rows)?;
            publisher
                .counters()
                .add_entities_normalized(entities.len() as u64);

            for entity in &entities {
                if let Some(action) = publisher.map(entity)? {
                    actions.push(action);
                }
            }
        }

        let count = actions.len() as u64;
        publisher.submit(actions).await?;
        publisher.writer().flush().await?;

        Ok(count)
    }

    async fn advance_checkpoint(
        &self,
        to: DateTime<Utc>,
        flight: &FlightRecordHandle,
    ) -> IndexerResult<DateTime<Utc>> {
        #[cfg(feature = "failpoints")]
        indexer_fail_point(BEFORE_CHECKPOINT_ADVANCE)?;

        let stored = self
            .checkpoints
            .advance(&self.name, to)
            .await?
            .last_successful_run_time();

        flight.set_last_checkpoint(stored);
        counter!(INDEXER_CHECKPOINT_ADVANCES_TOTAL, JOB_LABEL => self.name.clone()).increment(1);

        Ok(stored)
    }
}

#[async_trait]
impl<T, S, N, M, I, C> Job for SavePointJob<T, S, N, M, I, C>
where
    T: ChangeTracker + Send + Sync + 'static,
    S: ChangeSource + Send + Sync + 'static,
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

        if options.mode != RunMode::Incremental || options.has_id_range() {
            bail!(
                ErrorKind::ConfigError,
                "Save-point jobs only run incrementally",
                format!("job {} got mode {:?}", self.name, options.mode)
            );
        }

        let checkpoint = match options.last_run_time {
            Some(last_run_time) => Checkpoint::new(last_run_time),
            None => self.checkpoints.read(&self.name).await?,
        };

        let index = options
            .index_name
            .clone()
            .unwrap_or_else(|| self.settings.index_name.clone());
        self.client.ensure_index(&index).await?;

        let writer = BulkIndexWriter::new(self.client.clone(), index.clone(), &self.settings.bulk);
        let publisher = DocumentPublisher::new(
            self.name.clone(),
            self.mapper.clone(),
            writer.clone(),
            MappingContext {
                include_restricted: options.include_restricted,
            },
            self.settings.on_serialization_failure,
            Arc::new(RunCounters::default()),
        );
        let progress = RunProgress::new(self.name.clone(), flight.clone(), 0);

        info!(job = %self.name, %checkpoint, %index, "save-point run started");

        let mut batches = self
            .tracker
            .batches_since(checkpoint.last_successful_run_time())
            .await?;
        let mut outcome = JobOutcome::default();
        let mut completed: u64 = 0;

        let processed = async {
            'portions: loop {
                let portion = batches.next_portion().await?;
                if portion.is_empty() {
                    break;
                }
                progress.add_planned_batches(portion.len() as u32);

                for batch in portion {
                    if shutdown.is_shutdown() {
                        outcome.interrupted = true;
                        break 'portions;
                    }

                    let records = match self.process_batch(&batch, &publisher).await {
                        Ok(records) => records,
                        Err(err) => {
                            error!(
                                job = %self.name,
                                completed_batches = completed,
                                identifiers = batch.len(),
                                checkpoint = ?outcome.checkpoint,
                                error = %err,
                                "batch failed, run stopped at last save point"
                            );

                            return Err(err);
                        }
                    };

                    if let Some(timestamp) = batch.timestamp() {
                        let stored = self.advance_checkpoint(timestamp, &flight).await?;
                        outcome.checkpoint = Some(stored);
                    }

                    completed += 1;
                    outcome.records_processed += records;
                    progress.batch_completed(records);
                }
            }

            Ok::<(), IndexerError>(())
        }
        .await;

        // The writer is closed on failure too, and its own error never hides the batch error.
        let closed = writer.close().await;
        match processed {
            Ok(()) => {
                closed?;
            }
            Err(err) => {
                if let Err(close_err) = closed {
                    warn!(
                        job = %self.name,
                        error = %close_err,
                        "bulk writer failed to close after a failed batch"
                    );
                }

                return Err(err);
            }
        }

        if outcome.interrupted {
            flight.mark_interrupted();
        }

        info!(
            job = %self.name,
            batches = completed,
            records = outcome.records_processed,
            checkpoint = ?outcome.checkpoint,
            interrupted = outcome.interrupted,
            "save-point run finished"
        );

        Ok(outcome)
    }
}
