use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, IndexerError, IndexerResult};
use crate::index::IndexClient;
use crate::index::document::DocumentMapper;
use crate::indexer_error;
use crate::normalizer::{EntityNormalizer, reduce_all};
use crate::source::ChangeSource;
use crate::types::BatchBucket;
use crate::workers::base::StageKind;
use crate::workers::publisher::DocumentPublisher;

/// Outcome of one indexed bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketReport {
    pub bucket_number: u32,
    pub rows: u64,
    pub entities: u64,
}

/// Reads, normalizes and publishes every row of one bucket.
///
/// The bucket's actions go to the shared writer; they are acknowledged when the writer is
/// flushed or closed.
pub async fn index_bucket<S, N, M, I>(
    source: S,
    normalizer: Arc<N>,
    publisher: DocumentPublisher<M, I>,
    bucket: BatchBucket,
) -> IndexerResult<BucketReport>
where
    S: ChangeSource,
    N: EntityNormalizer<S::Row>,
    M: DocumentMapper<N::Entity>,
    I: IndexClient + Send + Sync + 'static,
{
    let rows = source.pull_range(&bucket.range()).await?;
    let row_count = rows.len() as u64;
    publisher.counters().add_rows_read(row_count);

    let entities = reduce_all(normalizer.as_ref(), rows)?;
    let entity_count = entities.len() as u64;
    publisher.counters().add_entities_normalized(entity_count);

    for entity in &entities {
        publisher.publish(entity).await?;
    }

    debug!(%bucket, rows = row_count, entities = entity_count, "bucket indexed");

    Ok(BucketReport {
        bucket_number: bucket.bucket_number,
        rows: row_count,
        entities: entity_count,
    })
}

/// Bounded pool of bucket workers for full loads.
///
/// At most `workers` buckets run at once; [`BucketWorkerPool::spawn`] waits for a free slot.
/// Buckets have no ordering dependency on each other.
#[derive(Debug)]
pub struct BucketWorkerPool {
    permits: Arc<Semaphore>,
    join_set: JoinSet<(u32, IndexerResult<BucketReport>)>,
    shutdown: ShutdownRx,
    interrupted: bool,
}

impl BucketWorkerPool {
    pub fn new(workers: usize, shutdown: ShutdownRx) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            join_set: JoinSet::new(),
            shutdown,
            interrupted: false,
        }
    }

    /// Spawns a worker once a slot frees up.
    ///
    /// Returns false without spawning when shutdown was requested; buckets already running
    /// finish their current unit of work.
    pub async fn spawn<F>(&mut self, bucket_number: u32, future: F) -> IndexerResult<bool>
    where
        F: Future<Output = IndexerResult<BucketReport>> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;

            _ = self.shutdown.wait() => None,
            permit = self.permits.clone().acquire_owned() => Some(permit),
        };

        let permit: OwnedSemaphorePermit = match permit {
            None => {
                self.interrupted = true;
                info!(bucket_number, "bucket skipped after shutdown request");
                return Ok(false);
            }
            Some(permit) => permit.map_err(|err| {
                indexer_error!(ErrorKind::InvalidState, "Bucket worker permits are closed", err)
            })?,
        };

        self.join_set.spawn(async move {
            let _permit = permit;
            (bucket_number, future.await)
        });

        debug!(bucket_number, "spawned bucket worker");

        Ok(true)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Waits for every spawned worker, calling `on_done` as each one succeeds.
    ///
    /// Errors of all failed workers are aggregated.
    pub async fn wait_all(
        &mut self,
        mut on_done: impl FnMut(&BucketReport),
    ) -> IndexerResult<Vec<BucketReport>> {
        let mut reports = Vec::new();
        let mut errors: Vec<IndexerError> = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((_, Ok(report))) => {
                    on_done(&report);
                    reports.push(report);
                }
                Ok((bucket_number, Err(err))) => {
                    error!(bucket_number, error = %err, "bucket worker failed");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("bucket worker was cancelled");
                    } else {
                        errors.push(StageKind::Bucket.join_error(join_err));
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        reports.sort_by_key(|report| report.bucket_number);

        Ok(reports)
    }
}
