use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::IndexerResult;
use crate::types::JobBatch;

/// Cursor over the change batches of one run.
pub trait BatchIterator: Send {
    /// Returns the next portion of batches, in checkpoint order.
    ///
    /// An empty portion means there is no more work.
    fn next_portion(&mut self) -> impl Future<Output = IndexerResult<Vec<JobBatch>>> + Send;
}

/// Detects changed entities and splits them into batches.
pub trait ChangeTracker {
    type Batches: BatchIterator;

    /// Returns a cursor over batches of changes made after `checkpoint`.
    fn batches_since(
        &self,
        checkpoint: DateTime<Utc>,
    ) -> impl Future<Output = IndexerResult<Self::Batches>> + Send;
}

/// In-memory change tracker serving fixed batches.
///
/// Batches are handed out in portions of `portion_size`. A batch is served when its timestamp is
/// after the checkpoint or unknown.
#[derive(Debug, Clone)]
pub struct MemoryChangeTracker {
    batches: Arc<Mutex<Vec<JobBatch>>>,
    portion_size: usize,
}

impl MemoryChangeTracker {
    pub fn new(batches: Vec<JobBatch>, portion_size: usize) -> Self {
        Self {
            batches: Arc::new(Mutex::new(batches)),
            portion_size: portion_size.max(1),
        }
    }

    pub async fn push_batch(&self, batch: JobBatch) {
        self.batches.lock().await.push(batch);
    }
}

impl ChangeTracker for MemoryChangeTracker {
    type Batches = MemoryBatchIterator;

    async fn batches_since(&self, checkpoint: DateTime<Utc>) -> IndexerResult<MemoryBatchIterator> {
        let batches: VecDeque<JobBatch> = self
            .batches
            .lock()
            .await
            .iter()
            .filter(|batch| batch.timestamp().is_none_or(|ts| ts > checkpoint))
            .cloned()
            .collect();

        Ok(MemoryBatchIterator {
            remaining: batches,
            portion_size: self.portion_size,
        })
    }
}

#[derive(Debug)]
pub struct MemoryBatchIterator {
    remaining: VecDeque<JobBatch>,
    portion_size: usize,
}

impl BatchIterator for MemoryBatchIterator {
    async fn next_portion(&mut self) -> IndexerResult<Vec<JobBatch>> {
        let take = self.portion_size.min(self.remaining.len());

        Ok(self.remaining.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_utils::person::base_time;
    use crate::types::{ChangedEntityIdentifier, RecordChangeOperation};

    fn batch(id: &str, offset: i64) -> JobBatch {
        JobBatch::from_identifiers(vec![ChangedEntityIdentifier::new(
            id,
            RecordChangeOperation::Update,
            base_time() + Duration::seconds(offset),
        )])
    }

    #[tokio::test]
    async fn serves_portions_after_checkpoint_until_empty() {
        let tracker = MemoryChangeTracker::new(
            vec![batch("a", 0), batch("b", 1), batch("c", 2), batch("d", 3)],
            2,
        );

        let mut batches = tracker.batches_since(base_time()).await.unwrap();

        assert_eq!(batches.next_portion().await.unwrap().len(), 2);
        assert_eq!(batches.next_portion().await.unwrap().len(), 1);
        assert!(batches.next_portion().await.unwrap().is_empty());
    }
}
