use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::IndexerResult;
use crate::index::{BulkResponse, IndexAction, IndexClient};

#[derive(Debug, Default)]
struct Inner {
    indexes: HashMap<String, BTreeMap<String, Value>>,
    bulk_requests: Vec<usize>,
}

/// In-memory search index for tests and development.
///
/// Documents are kept per index name, ordered by id. Every bulk request is recorded with its
/// action count.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the documents of `index`.
    pub async fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        let inner = self.inner.lock().await;
        inner.indexes.get(index).cloned().unwrap_or_default()
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let inner = self.inner.lock().await;
        inner.indexes.get(index)?.get(id).cloned()
    }

    pub async fn index_exists(&self, index: &str) -> bool {
        self.inner.lock().await.indexes.contains_key(index)
    }

    /// Returns the action count of every bulk request received so far.
    pub async fn bulk_requests(&self) -> Vec<usize> {
        self.inner.lock().await.bulk_requests.clone()
    }
}

impl IndexClient for MemoryIndex {
    fn name() -> &'static str {
        "memory"
    }

    async fn ensure_index(&self, index: &str) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.indexes.entry(index.to_string()).or_default();

        Ok(())
    }

    async fn drop_index(&self, index: &str) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.indexes.remove(index);

        debug!(index, "dropped memory index");

        Ok(())
    }

    async fn bulk(&self, index: &str, actions: Vec<IndexAction>) -> IndexerResult<BulkResponse> {
        let mut inner = self.inner.lock().await;
        inner.bulk_requests.push(actions.len());

        let items = actions.len();
        let documents = inner.indexes.entry(index.to_string()).or_default();
        for action in actions {
            match action {
                IndexAction::Upsert { id, document } => {
                    merge_document(documents.entry(id).or_insert(Value::Null), document);
                }
                IndexAction::Delete { id } => {
                    documents.remove(&id);
                }
            }
        }

        Ok(BulkResponse { items, failed: 0 })
    }
}

/// Applies partial-update semantics: object fields are replaced one by one.
fn merge_document(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                existing.insert(key, value);
            }
        }
        (target, update) => *target = update,
    }
}
