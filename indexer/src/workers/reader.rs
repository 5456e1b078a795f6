use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::IndexerResult;
use crate::metrics::{INDEXER_ROWS_READ_TOTAL, JOB_LABEL};
use crate::source::ChangeSource;
use crate::types::IdRange;
use crate::workers::base::{RunCounters, StageDoneGuard};

/// Rows a pipeline run reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineInput {
    /// Rows replicated at or after the checkpoint.
    ChangedSince(DateTime<Utc>),
    /// Rows whose group key falls in the range.
    Range(IdRange),
}

impl fmt::Display for PipelineInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineInput::ChangedSince(checkpoint) => write!(f, "changed since {checkpoint}"),
            PipelineInput::Range(range) => write!(f, "range {range}"),
        }
    }
}

/// Settings of the reader stage.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub job: String,
    pub log_every: u64,
}

/// Pulls rows from the source and feeds them to the normalizer queue.
///
/// A shutdown request is honored once the current pull returns. It stops enqueuing but keeps
/// what is already queued, so downstream stages drain it like at the end of a clean read. Returns [`ShutdownResult::Shutdown`] with the number
/// of rows enqueued in that case.
pub async fn run_reader<S>(
    source: S,
    input: PipelineInput,
    rows_tx: mpsc::Sender<S::Row>,
    mut shutdown: ShutdownRx,
    settings: ReaderSettings,
    counters: Arc<RunCounters>,
    _done: StageDoneGuard,
) -> IndexerResult<ShutdownResult<u64, u64>>
where
    S: ChangeSource,
{
    debug!(job = %settings.job, %input, "reader started");

    // A pull in flight is never dropped; interrupts are honored once it returns.
    let rows = match pull(&source, &input).await {
        Ok(rows) => rows,
        Err(err) => {
            error!(job = %settings.job, %input, error = %err, "reader could not pull rows");
            return Err(err);
        }
    };

    let total = rows.len();
    if shutdown.is_shutdown() {
        info!(job = %settings.job, pulled = total, "reader interrupted after pulling rows");
        return Ok(ShutdownResult::Shutdown(0));
    }

    let mut enqueued: u64 = 0;
    for row in rows {
        let sent = tokio::select! {
            biased;

            _ = shutdown.wait() => {
                info!(job = %settings.job, enqueued, total, "reader interrupted");
                return Ok(ShutdownResult::Shutdown(enqueued));
            }
            sent = rows_tx.send(row) => sent,
        };

        if sent.is_err() {
            // The normalizer stopped and reports its own error.
            debug!(job = %settings.job, enqueued, "normalizer queue closed, reader stopping");
            break;
        }

        enqueued += 1;
        counters.add_rows_read(1);
        counter!(INDEXER_ROWS_READ_TOTAL, JOB_LABEL => settings.job.clone()).increment(1);

        if settings.log_every > 0 && enqueued % settings.log_every == 0 {
            info!(job = %settings.job, enqueued, total, "reader progress");
        }
    }

    info!(job = %settings.job, rows = enqueued, "reader finished");

    Ok(ShutdownResult::Ok(enqueued))
}

async fn pull<S>(source: &S, input: &PipelineInput) -> IndexerResult<Vec<S::Row>>
where
    S: ChangeSource,
{
    match input {
        PipelineInput::ChangedSince(checkpoint) => source.pull_changed_since(*checkpoint).await,
        PipelineInput::Range(range) => source.pull_range(range).await,
    }
}
