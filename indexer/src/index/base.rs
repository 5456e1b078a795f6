use std::future::Future;

use serde_json::Value;

use crate::error::IndexerResult;

/// One operation of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexAction {
    /// Inserts the document or replaces the fields of the existing one.
    Upsert { id: String, document: Value },
    /// Removes the document, succeeding when it does not exist.
    Delete { id: String },
}

impl IndexAction {
    pub fn id(&self) -> &str {
        match self {
            IndexAction::Upsert { id, .. } | IndexAction::Delete { id } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, IndexAction::Delete { .. })
    }
}

/// Acknowledgement of one bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Number of actions acknowledged.
    pub items: usize,
    /// Number of those actions the index rejected.
    pub failed: usize,
}

impl BulkResponse {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Client of a search index accepting bulk requests.
///
/// Upserts are keyed by document id so redelivering an action is harmless.
pub trait IndexClient {
    /// Returns the name of the client.
    fn name() -> &'static str;

    /// Creates `index` if it does not exist.
    fn ensure_index(&self, index: &str) -> impl Future<Output = IndexerResult<()>> + Send;

    /// Deletes `index` and all of its documents, succeeding if it does not exist.
    fn drop_index(&self, index: &str) -> impl Future<Output = IndexerResult<()>> + Send;

    /// Sends `actions` in one request.
    ///
    /// Transport failures return an error. Per-action rejections are reported in the
    /// [`BulkResponse`].
    fn bulk(
        &self,
        index: &str,
        actions: Vec<IndexAction>,
    ) -> impl Future<Output = IndexerResult<BulkResponse>> + Send;
}
