use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, IndexerError, IndexerResult};

/// Kind of change recorded for an entity in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordChangeOperation {
    Insert,
    Update,
    Delete,
}

impl RecordChangeOperation {
    /// Parses the single letter operation codes written by the source replication.
    pub fn from_code(code: &str) -> IndexerResult<Self> {
        match code.trim() {
            "I" => Ok(RecordChangeOperation::Insert),
            "U" => Ok(RecordChangeOperation::Update),
            "D" => Ok(RecordChangeOperation::Delete),
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown change operation code",
                other
            ),
        }
    }
}

impl TryFrom<&str> for RecordChangeOperation {
    type Error = IndexerError;

    fn try_from(code: &str) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

/// One detected change of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangedEntityIdentifier {
    id: String,
    operation: RecordChangeOperation,
    changed_at: DateTime<Utc>,
}

impl ChangedEntityIdentifier {
    pub fn new(
        id: impl Into<String>,
        operation: RecordChangeOperation,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            changed_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> RecordChangeOperation {
        self.operation
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    pub fn is_delete(&self) -> bool {
        self.operation == RecordChangeOperation::Delete
    }
}

impl fmt::Display for ChangedEntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?} @ {})", self.id, self.operation, self.changed_at)
    }
}

/// A group of changed identifiers processed and checkpointed together.
///
/// The timestamp is the checkpoint candidate once the batch is durably indexed. A batch
/// without a timestamp still carries work but cannot move the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    identifiers: Vec<ChangedEntityIdentifier>,
    timestamp: Option<DateTime<Utc>>,
}

impl JobBatch {
    pub fn new(
        identifiers: Vec<ChangedEntityIdentifier>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            identifiers,
            timestamp,
        }
    }

    /// Creates a batch whose timestamp is the latest change it contains.
    pub fn from_identifiers(identifiers: Vec<ChangedEntityIdentifier>) -> Self {
        let timestamp = identifiers.iter().map(|id| id.changed_at).max();
        Self::new(identifiers, timestamp)
    }

    pub fn identifiers(&self) -> &[ChangedEntityIdentifier] {
        &self.identifiers
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Splits the batch into ids to delete and identifiers whose entity must be reloaded.
    pub fn split_deletes(&self) -> (Vec<&str>, Vec<ChangedEntityIdentifier>) {
        let mut deletes = Vec::new();
        let mut loads = Vec::new();

        for identifier in &self.identifiers {
            if identifier.is_delete() {
                deletes.push(identifier.id());
            } else {
                loads.push(identifier.clone());
            }
        }

        (deletes, loads)
    }
}

/// A denormalized row read from the source.
///
/// Rows of one entity share a group key. Sources return them contiguously so that they can
/// be regrouped in a single pass.
pub trait ChangeRow: Clone + fmt::Debug + Send + Sync + 'static {
    /// Key of the entity this row belongs to.
    fn group_key(&self) -> &str;

    /// Replication marker compared against checkpoints.
    fn replicated_at(&self) -> DateTime<Utc>;
}
