use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::index::memory::MemoryIndex;
use crate::index::{BulkResponse, IndexAction, IndexClient};

#[derive(Debug, Default)]
struct Faults {
    failing_bulk_requests: usize,
    bulk_attempts: usize,
}

/// Wraps a [`MemoryIndex`] and fails chosen bulk requests with a transport error.
///
/// A failed request leaves the wrapped index untouched.
#[derive(Debug, Clone)]
pub struct FailingIndex {
    inner: MemoryIndex,
    faults: Arc<Mutex<Faults>>,
}

impl FailingIndex {
    pub fn wrap(inner: MemoryIndex) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// Makes the next `count` bulk requests fail.
    pub async fn fail_next_bulk_requests(&self, count: usize) {
        self.faults.lock().await.failing_bulk_requests = count;
    }

    /// Returns the number of bulk requests received, failed ones included.
    pub async fn bulk_attempts(&self) -> usize {
        self.faults.lock().await.bulk_attempts
    }

    pub fn inner(&self) -> &MemoryIndex {
        &self.inner
    }

    pub async fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        self.inner.documents(index).await
    }
}

impl IndexClient for FailingIndex {
    fn name() -> &'static str {
        "failing"
    }

    async fn ensure_index(&self, index: &str) -> IndexerResult<()> {
        self.inner.ensure_index(index).await
    }

    async fn drop_index(&self, index: &str) -> IndexerResult<()> {
        self.inner.drop_index(index).await
    }

    async fn bulk(&self, index: &str, actions: Vec<IndexAction>) -> IndexerResult<BulkResponse> {
        {
            let mut faults = self.faults.lock().await;
            faults.bulk_attempts += 1;

            if faults.failing_bulk_requests > 0 {
                faults.failing_bulk_requests -= 1;
                bail!(
                    ErrorKind::IndexRequestFailed,
                    "Injected bulk request failure",
                    format!("{} actions", actions.len())
                );
            }
        }

        self.inner.bulk(index, actions).await
    }
}
