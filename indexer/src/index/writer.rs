use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use config::shared::BulkConfig;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::bail;
use crate::error::{ErrorKind, IndexerError, IndexerResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{BEFORE_BULK_REQUEST, indexer_fail_point};
use crate::index::{IndexAction, IndexClient};
use crate::indexer_error;
use crate::metrics::{
    INDEX_LABEL, INDEXER_BULK_FAILED_ACTIONS_TOTAL, INDEXER_BULK_REQUEST_DURATION_SECONDS,
    INDEXER_BULK_REQUESTS_TOTAL,
};

/// Totals of one writer's bulk traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteStats {
    pub requests: u64,
    pub failed_requests: u64,
    pub actions_sent: u64,
    pub actions_acknowledged: u64,
    pub actions_failed: u64,
}

impl BulkWriteStats {
    pub fn has_failures(&self) -> bool {
        self.failed_requests > 0 || self.actions_failed > 0
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    actions_sent: AtomicU64,
    actions_acknowledged: AtomicU64,
    actions_failed: AtomicU64,
    // Failures not yet reported by a flush.
    unreported_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> BulkWriteStats {
        BulkWriteStats {
            requests: self.requests.load(Ordering::Acquire),
            failed_requests: self.failed_requests.load(Ordering::Acquire),
            actions_sent: self.actions_sent.load(Ordering::Acquire),
            actions_acknowledged: self.actions_acknowledged.load(Ordering::Acquire),
            actions_failed: self.actions_failed.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug)]
struct WriterInner<I> {
    client: I,
    index: String,
    max_actions: usize,
    max_concurrent_requests: usize,
    close_timeout: Duration,
    buffer: Mutex<Vec<IndexAction>>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    stats: StatsCounters,
    closed: AtomicBool,
}

impl<I> WriterInner<I>
where
    I: IndexClient + Send + Sync + 'static,
{
    async fn send(&self, actions: Vec<IndexAction>) {
        let count = actions.len() as u64;
        self.stats.requests.fetch_add(1, Ordering::AcqRel);
        self.stats.actions_sent.fetch_add(count, Ordering::AcqRel);
        counter!(INDEXER_BULK_REQUESTS_TOTAL, INDEX_LABEL => self.index.clone()).increment(1);

        let started = Instant::now();
        let result = self.request(actions).await;
        histogram!(INDEXER_BULK_REQUEST_DURATION_SECONDS, INDEX_LABEL => self.index.clone())
            .record(started.elapsed().as_secs_f64());

        let failed = match result {
            Ok(response) => {
                let failed = response.failed as u64;
                self.stats
                    .actions_acknowledged
                    .fetch_add(count - failed.min(count), Ordering::AcqRel);

                if response.has_failures() {
                    error!(
                        index = %self.index,
                        actions = count,
                        failed,
                        "bulk request partially rejected"
                    );
                }

                failed
            }
            Err(err) => {
                self.stats.failed_requests.fetch_add(1, Ordering::AcqRel);
                error!(index = %self.index, actions = count, error = %err, "bulk request failed");

                count
            }
        };

        if failed > 0 {
            self.stats.actions_failed.fetch_add(failed, Ordering::AcqRel);
            self.stats
                .unreported_failures
                .fetch_add(failed, Ordering::AcqRel);
            counter!(INDEXER_BULK_FAILED_ACTIONS_TOTAL, INDEX_LABEL => self.index.clone())
                .increment(failed);
        } else {
            debug!(index = %self.index, actions = count, "bulk request acknowledged");
        }
    }

    async fn request(
        &self,
        actions: Vec<IndexAction>,
    ) -> IndexerResult<crate::index::BulkResponse> {
        #[cfg(feature = "failpoints")]
        indexer_fail_point(BEFORE_BULK_REQUEST)?;

        self.client.bulk(&self.index, actions).await
    }
}

/// Buffers index actions and sends them as bulk requests.
///
/// A full buffer is sent automatically; [`BulkIndexWriter::flush`] and
/// [`BulkIndexWriter::close`] send the rest and wait for every request in flight. At most
/// `max_concurrent_requests` requests run at once and adding actions waits for a free slot,
/// which propagates backpressure to the caller.
///
/// Failed requests are logged with their action count and never retried here. They surface
/// as an error from the next flush or close.
///
/// Clones share the same buffer, so one writer serves every worker of a run.
#[derive(Debug)]
pub struct BulkIndexWriter<I> {
    inner: Arc<WriterInner<I>>,
}

impl<I> Clone for BulkIndexWriter<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I> BulkIndexWriter<I>
where
    I: IndexClient + Send + Sync + 'static,
{
    pub fn new(client: I, index: impl Into<String>, config: &BulkConfig) -> Self {
        let max_concurrent_requests = config.max_concurrent_requests.max(1);

        let inner = WriterInner {
            client,
            index: index.into(),
            max_actions: config.max_actions.max(1),
            max_concurrent_requests,
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            buffer: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_requests)),
            in_flight: Mutex::new(JoinSet::new()),
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn index(&self) -> &str {
        &self.inner.index
    }

    /// Returns the totals of every request finished so far.
    pub fn stats(&self) -> BulkWriteStats {
        self.inner.stats.snapshot()
    }

    /// Buffers an action, sending the buffer once it reaches the configured size.
    pub async fn add(&self, action: IndexAction) -> IndexerResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::InvalidState,
                "Bulk writer is closed",
                self.inner.index.clone()
            );
        }

        let full = {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.push(action);

            if buffer.len() >= self.inner.max_actions {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(actions) = full {
            self.dispatch(actions).await?;
        }

        Ok(())
    }

    /// Buffers several actions.
    pub async fn add_all(&self, actions: impl IntoIterator<Item = IndexAction>) -> IndexerResult<()> {
        for action in actions {
            self.add(action).await?;
        }

        Ok(())
    }

    /// Sends the buffer and waits until every request in flight is answered.
    ///
    /// Returns an error if any action failed since the previous flush.
    pub async fn flush(&self) -> IndexerResult<BulkWriteStats> {
        let remaining = std::mem::take(&mut *self.inner.buffer.lock().await);
        if !remaining.is_empty() {
            self.dispatch(remaining).await?;
        }

        let mut errors: Vec<IndexerError> = Vec::new();
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            while let Some(result) = in_flight.join_next().await {
                let Err(err) = result else {
                    continue;
                };

                if !err.is_cancelled() {
                    self.inner
                        .stats
                        .failed_requests
                        .fetch_add(1, Ordering::AcqRel);
                    errors.push(indexer_error!(
                        ErrorKind::BulkRequestPanic,
                        "Bulk request task panicked",
                        err
                    ));
                }
            }
        }

        let failed = self.inner.stats.unreported_failures.swap(0, Ordering::AcqRel);
        if failed > 0 {
            errors.push(indexer_error!(
                ErrorKind::BulkWriteError,
                "Bulk actions were not acknowledged",
                format!("{failed} actions failed on index {}", self.inner.index)
            ));
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(self.stats())
    }

    /// Flushes, waiting at most the configured close timeout, and rejects further actions.
    pub async fn close(&self) -> IndexerResult<BulkWriteStats> {
        let result = tokio::time::timeout(self.inner.close_timeout, self.flush()).await;
        self.inner.closed.store(true, Ordering::Release);

        let stats = match result {
            Ok(result) => result?,
            Err(_) => bail!(
                ErrorKind::BulkWriteTimeout,
                "Bulk writer did not drain before the close timeout",
                format!(
                    "index {} after {:?}",
                    self.inner.index, self.inner.close_timeout
                )
            ),
        };

        info!(
            index = %self.inner.index,
            requests = stats.requests,
            acknowledged = stats.actions_acknowledged,
            failed = stats.actions_failed,
            "bulk writer closed"
        );

        Ok(stats)
    }

    async fn dispatch(&self, actions: Vec<IndexAction>) -> IndexerResult<()> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| {
                indexer_error!(
                    ErrorKind::InvalidState,
                    "Bulk writer permits are closed",
                    err
                )
            })?;

        let inner = self.inner.clone();
        let mut in_flight = self.inner.in_flight.lock().await;

        // Reaps finished requests so the set only holds live ones.
        while let Some(result) = in_flight.try_join_next() {
            if let Err(err) = result {
                error!(error = %err, "bulk request task ended abnormally");
            }
        }

        debug!(
            index = %self.inner.index,
            actions = actions.len(),
            in_flight = self.inner.max_concurrent_requests - self.inner.permits.available_permits(),
            "dispatching bulk request"
        );

        in_flight.spawn(async move {
            let _permit = permit;
            inner.send(actions).await;
        });

        Ok(())
    }
}
