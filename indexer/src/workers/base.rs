use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::task::JoinError;

use crate::error::{ErrorKind, IndexerError};
use crate::indexer_error;

/// Stages of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Reader,
    Normalizer,
    Publisher,
    Bucket,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Reader => "reader",
            StageKind::Normalizer => "normalizer",
            StageKind::Publisher => "publisher",
            StageKind::Bucket => "bucket",
        }
    }

    /// Converts the join failure of a stage task into an error.
    pub fn join_error(&self, err: JoinError) -> IndexerError {
        let kind = match self {
            StageKind::Reader => ErrorKind::ReaderPanic,
            StageKind::Normalizer => ErrorKind::NormalizerPanic,
            StageKind::Publisher => ErrorKind::PublisherPanic,
            StageKind::Bucket => ErrorKind::BucketWorkerPanic,
        };

        indexer_error!(kind, "Indexing stage task ended abnormally", err)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Done flag of one stage.
#[derive(Debug, Clone, Default)]
pub struct StageFlag(Arc<AtomicBool>);

impl StageFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns a guard setting the flag when dropped, so a stage that fails or panics still
    /// reports completion.
    pub fn guard(&self) -> StageDoneGuard {
        StageDoneGuard(self.0.clone())
    }
}

#[derive(Debug)]
pub struct StageDoneGuard(Arc<AtomicBool>);

impl Drop for StageDoneGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Done flags of the three pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct StageFlags {
    pub reader: StageFlag,
    pub normalizer: StageFlag,
    pub publisher: StageFlag,
}

impl StageFlags {
    pub fn all_done(&self) -> bool {
        self.reader.is_set() && self.normalizer.is_set() && self.publisher.is_set()
    }
}

/// Item totals of one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingTotals {
    pub rows_read: u64,
    pub entities_normalized: u64,
    pub documents_published: u64,
    pub documents_skipped: u64,
}

impl IndexingTotals {
    /// Returns the number of entities that reached the index or were deliberately skipped.
    pub fn records_processed(&self) -> u64 {
        self.documents_published + self.documents_skipped
    }
}

/// Counters shared by the workers of one run.
#[derive(Debug, Default)]
pub struct RunCounters {
    rows_read: AtomicU64,
    entities_normalized: AtomicU64,
    documents_published: AtomicU64,
    documents_skipped: AtomicU64,
}

impl RunCounters {
    pub fn add_rows_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::AcqRel);
    }

    pub fn add_entities_normalized(&self, entities: u64) {
        self.entities_normalized.fetch_add(entities, Ordering::AcqRel);
    }

    pub fn add_documents_published(&self, documents: u64) {
        self.documents_published.fetch_add(documents, Ordering::AcqRel);
    }

    pub fn add_documents_skipped(&self, documents: u64) {
        self.documents_skipped.fetch_add(documents, Ordering::AcqRel);
    }

    pub fn totals(&self) -> IndexingTotals {
        IndexingTotals {
            rows_read: self.rows_read.load(Ordering::Acquire),
            entities_normalized: self.entities_normalized.load(Ordering::Acquire),
            documents_published: self.documents_published.load(Ordering::Acquire),
            documents_skipped: self.documents_skipped.load(Ordering::Acquire),
        }
    }
}
