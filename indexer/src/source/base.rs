use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::IndexerResult;
use crate::types::{BatchBucket, ChangeRow, ChangedEntityIdentifier, IdRange};

/// Store from which denormalized change rows are read.
///
/// Every pull returns rows of one entity contiguously, which the streaming normalizer relies
/// on. A failing pull returns an error and none of the rows read so far, so callers never see
/// a partial result. Sources are cloned into worker tasks and should be cheap to clone.
pub trait ChangeSource {
    type Row: ChangeRow;

    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Pulls rows whose replication marker is at or after `checkpoint`.
    fn pull_changed_since(
        &self,
        checkpoint: DateTime<Utc>,
    ) -> impl Future<Output = IndexerResult<Vec<Self::Row>>> + Send;

    /// Pulls every row whose group key falls in `range`.
    fn pull_range(
        &self,
        range: &IdRange,
    ) -> impl Future<Output = IndexerResult<Vec<Self::Row>>> + Send;

    /// Pulls the rows of the given entities.
    fn pull_identifiers(
        &self,
        identifiers: &[ChangedEntityIdentifier],
    ) -> impl Future<Output = IndexerResult<Vec<Self::Row>>> + Send;

    /// Splits `driver_table` into at most `total_buckets` chained buckets.
    fn allocate_buckets(
        &self,
        total_buckets: u32,
        driver_table: &str,
    ) -> impl Future<Output = IndexerResult<Vec<BatchBucket>>> + Send;
}
