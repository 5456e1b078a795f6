//! Range partitioning of a driver table into buckets for parallel full loads.

use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::source::ChangeSource;
use crate::types::BatchBucket;

/// Splits ids into `total_buckets` contiguous buckets of roughly equal size.
///
/// Ids are ranked in ascending order and every `count / total_buckets` ranks form a bucket;
/// the last bucket absorbs the remainder. With fewer ids than buckets every id gets its own
/// bucket. No ids yield no buckets.
pub fn partition_identifiers(
    mut ids: Vec<String>,
    total_buckets: u32,
) -> IndexerResult<Vec<BatchBucket>> {
    if total_buckets == 0 {
        bail!(
            ErrorKind::ConfigError,
            "Bucket allocation needs at least one bucket"
        );
    }

    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let count = ids.len();
    let total = (total_buckets as usize).min(count);
    let chunk = count / total;

    let buckets = (0..total)
        .map(|index| {
            let start = index * chunk;
            let is_last = index + 1 == total;
            let end = if is_last { count } else { start + chunk };

            BatchBucket {
                bucket_number: index as u32 + 1,
                min_id: ids[start].clone(),
                max_id: (!is_last).then(|| ids[end].clone()),
                row_count: (end - start) as u64,
            }
        })
        .collect();

    Ok(buckets)
}

/// Bucket bounds as reported by an allocation query, with an inclusive upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusiveBucket {
    pub bucket_number: u32,
    pub min_id: String,
    pub max_id: String,
    pub row_count: u64,
}

/// Chains inclusive bucket bounds into half-open buckets.
///
/// Each bucket ends where the next one starts, so ids falling between two observed bounds
/// still belong to exactly one bucket. The last bucket is left open.
pub fn chain_buckets(mut inclusive: Vec<InclusiveBucket>) -> Vec<BatchBucket> {
    inclusive.sort_by_key(|bucket| bucket.bucket_number);

    let next_mins: Vec<Option<String>> = inclusive
        .iter()
        .skip(1)
        .map(|bucket| Some(bucket.min_id.clone()))
        .chain(std::iter::once(None))
        .collect();

    inclusive
        .into_iter()
        .zip(next_mins)
        .map(|(bucket, max_id)| BatchBucket {
            bucket_number: bucket.bucket_number,
            min_id: bucket.min_id,
            max_id,
            row_count: bucket.row_count,
        })
        .collect()
}

/// Allocates buckets over a source's driver table.
#[derive(Debug, Clone)]
pub struct BucketPartitioner<S> {
    source: S,
}

impl<S> BucketPartitioner<S>
where
    S: ChangeSource,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Returns buckets covering every row of `driver_table`.
    ///
    /// An empty driver table yields an empty list, which callers treat as no work.
    pub async fn allocate(
        &self,
        total_buckets: u32,
        driver_table: &str,
    ) -> IndexerResult<Vec<BatchBucket>> {
        if total_buckets == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Bucket allocation needs at least one bucket"
            );
        }

        let buckets = self
            .source
            .allocate_buckets(total_buckets, driver_table)
            .await?;

        check_chained(&buckets)?;

        let total_rows: u64 = buckets.iter().map(|bucket| bucket.row_count).sum();
        info!(
            driver_table,
            requested = total_buckets,
            allocated = buckets.len(),
            total_rows,
            "allocated buckets"
        );
        for bucket in &buckets {
            debug!(%bucket, "bucket bounds");
        }

        Ok(buckets)
    }
}

/// Keeps the buckets numbered `start..=end`.
pub fn select_buckets(buckets: Vec<BatchBucket>, start: u32, end: u32) -> Vec<BatchBucket> {
    buckets
        .into_iter()
        .filter(|bucket| (start..=end).contains(&bucket.bucket_number))
        .collect()
}

fn check_chained(buckets: &[BatchBucket]) -> IndexerResult<()> {
    for pair in buckets.windows(2) {
        let chained = pair[0].max_id.as_deref() == Some(pair[1].min_id.as_str());
        if !chained || pair[0].min_id >= pair[1].min_id {
            bail!(
                ErrorKind::InvalidState,
                "Allocated buckets overlap or leave gaps",
                format!("{} is followed by {}", pair[0], pair[1])
            );
        }
    }

    if let Some(last) = buckets.last()
        && last.max_id.is_some()
    {
        bail!(
            ErrorKind::InvalidState,
            "Last allocated bucket must be open ended",
            last.to_string()
        );
    }

    Ok(())
}
