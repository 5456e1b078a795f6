use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::IndexerResult;

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<String, Checkpoint>,
    history: HashMap<String, Vec<DateTime<Utc>>>,
}

/// In-memory checkpoint store for tests and development.
///
/// Besides the current checkpoints it remembers every effective advance per job.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store where `job` already has a checkpoint.
    pub async fn with_checkpoint(job: &str, time: DateTime<Utc>) -> Self {
        let store = Self::new();
        store
            .inner
            .lock()
            .await
            .checkpoints
            .insert(job.to_string(), Checkpoint::new(time));
        store
    }

    /// Returns the stored checkpoint of `job` without the never-run fallback.
    pub async fn stored(&self, job: &str) -> Option<Checkpoint> {
        self.inner.lock().await.checkpoints.get(job).copied()
    }

    /// Returns every value `job`'s checkpoint was advanced to, oldest first.
    pub async fn history(&self, job: &str) -> Vec<DateTime<Utc>> {
        self.inner
            .lock()
            .await
            .history
            .get(job)
            .cloned()
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn read(&self, job: &str) -> IndexerResult<Checkpoint> {
        let stored = self.stored(job).await;
        Ok(stored.unwrap_or_else(|| Checkpoint::never_run(Utc::now())))
    }

    async fn advance(&self, job: &str, to: DateTime<Utc>) -> IndexerResult<Checkpoint> {
        let mut inner = self.inner.lock().await;

        if let Some(current) = inner.checkpoints.get(job)
            && current.last_successful_run_time() >= to
        {
            return Ok(*current);
        }

        let checkpoint = Checkpoint::new(to);
        inner.checkpoints.insert(job.to_string(), checkpoint);
        inner.history.entry(job.to_string()).or_default().push(to);

        Ok(checkpoint)
    }
}
