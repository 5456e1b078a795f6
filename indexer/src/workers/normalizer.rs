use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::IndexerResult;
use crate::metrics::{INDEXER_ENTITIES_NORMALIZED_TOTAL, JOB_LABEL};
use crate::normalizer::{EntityNormalizer, GroupReducer};
use crate::types::ChangeRow;
use crate::workers::base::{RunCounters, StageDoneGuard};

/// Regroups the row queue into entities and feeds them to the publisher queue.
///
/// Runs until the row queue is closed and drained, then reduces the last open group.
pub async fn run_normalizer<R, N>(
    job: String,
    normalizer: Arc<N>,
    mut rows_rx: mpsc::Receiver<R>,
    entities_tx: mpsc::Sender<N::Entity>,
    counters: Arc<RunCounters>,
    _done: StageDoneGuard,
) -> IndexerResult<()>
where
    R: ChangeRow,
    N: EntityNormalizer<R>,
{
    debug!(%job, "normalizer started");

    let mut reducer = GroupReducer::new(normalizer.as_ref());
    let mut emitted: u64 = 0;

    while let Some(row) = rows_rx.recv().await {
        let entity = match reducer.push(row) {
            Ok(entity) => entity,
            Err(err) => {
                error!(%job, emitted, error = %err, "normalizer stopped");
                return Err(err);
            }
        };

        if let Some(entity) = entity {
            if !emit(&job, &entities_tx, entity, &counters).await {
                return Ok(());
            }
            emitted += 1;
        }
    }

    match reducer.finish() {
        Ok(Some(entity)) => {
            if emit(&job, &entities_tx, entity, &counters).await {
                emitted += 1;
            }
        }
        Ok(None) => {}
        Err(err) => {
            error!(%job, emitted, error = %err, "normalizer stopped on last group");
            return Err(err);
        }
    }

    info!(%job, entities = emitted, "normalizer finished");

    Ok(())
}

/// Sends an entity downstream, returning false when the publisher is gone.
async fn emit<E>(
    job: &str,
    entities_tx: &mpsc::Sender<E>,
    entity: E,
    counters: &RunCounters,
) -> bool {
    if entities_tx.send(entity).await.is_err() {
        // The publisher stopped and reports its own error.
        debug!(job, "publisher queue closed, normalizer stopping");
        return false;
    }

    counters.add_entities_normalized(1);
    counter!(INDEXER_ENTITIES_NORMALIZED_TOTAL, JOB_LABEL => job.to_string()).increment(1);

    true
}
