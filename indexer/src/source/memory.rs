use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::partition::partition_identifiers;
use crate::source::ChangeSource;
use crate::types::{BatchBucket, ChangeRow, ChangedEntityIdentifier, IdRange};

#[derive(Debug)]
struct Inner<R> {
    rows: Vec<R>,
    unreadable_ids: HashSet<String>,
    pulls: usize,
}

/// In-memory change source for tests and development.
///
/// Rows are returned grouped by key in ascending key order, preserving insertion order within
/// a group. Ids marked unreadable make any pull touching them fail with
/// [`ErrorKind::SourceReadError`].
#[derive(Debug, Clone)]
pub struct MemoryChangeSource<R> {
    inner: Arc<Mutex<Inner<R>>>,
}

impl<R> MemoryChangeSource<R>
where
    R: ChangeRow,
{
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    pub fn with_rows(rows: Vec<R>) -> Self {
        let inner = Inner {
            rows,
            unreadable_ids: HashSet::new(),
            pulls: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn insert_rows(&self, rows: impl IntoIterator<Item = R>) {
        let mut inner = self.inner.lock().await;
        inner.rows.extend(rows);
    }

    /// Makes every pull that would return rows of `id` fail.
    pub async fn mark_unreadable(&self, id: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.unreadable_ids.insert(id.into());
    }

    /// Returns the number of pulls served so far, failed ones included.
    pub async fn pulls(&self) -> usize {
        self.inner.lock().await.pulls
    }

    async fn pull_where<F>(&self, operation: &'static str, filter: F) -> IndexerResult<Vec<R>>
    where
        F: Fn(&R) -> bool,
    {
        let mut inner = self.inner.lock().await;
        inner.pulls += 1;

        let mut rows: Vec<R> = inner.rows.iter().filter(|row| filter(row)).cloned().collect();

        if let Some(row) = rows
            .iter()
            .find(|row| inner.unreadable_ids.contains(row.group_key()))
        {
            bail!(
                ErrorKind::SourceReadError,
                "Source rows could not be read",
                format!("{operation} hit unreadable entity {}", row.group_key())
            );
        }

        // Stable, so rows of one entity keep their relative order.
        rows.sort_by(|a, b| a.group_key().cmp(b.group_key()));

        debug!(operation, rows = rows.len(), "served memory pull");

        Ok(rows)
    }
}

impl<R> Default for MemoryChangeSource<R>
where
    R: ChangeRow,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ChangeSource for MemoryChangeSource<R>
where
    R: ChangeRow,
{
    type Row = R;

    fn name() -> &'static str {
        "memory"
    }

    async fn pull_changed_since(&self, checkpoint: DateTime<Utc>) -> IndexerResult<Vec<R>> {
        self.pull_where("pull_changed_since", |row| row.replicated_at() >= checkpoint)
            .await
    }

    async fn pull_range(&self, range: &IdRange) -> IndexerResult<Vec<R>> {
        self.pull_where("pull_range", |row| range.contains(row.group_key()))
            .await
    }

    async fn pull_identifiers(
        &self,
        identifiers: &[ChangedEntityIdentifier],
    ) -> IndexerResult<Vec<R>> {
        let ids: HashSet<&str> = identifiers.iter().map(|id| id.id()).collect();

        {
            let inner = self.inner.lock().await;
            if let Some(id) = ids.iter().find(|id| inner.unreadable_ids.contains(**id)) {
                bail!(
                    ErrorKind::SourceReadError,
                    "Source rows could not be read",
                    format!("pull_identifiers hit unreadable entity {id}")
                );
            }
        }

        self.pull_where("pull_identifiers", |row| ids.contains(row.group_key()))
            .await
    }

    async fn allocate_buckets(
        &self,
        total_buckets: u32,
        driver_table: &str,
    ) -> IndexerResult<Vec<BatchBucket>> {
        let keys: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .rows
                .iter()
                .map(|row| row.group_key().to_string())
                .collect()
        };

        debug!(driver_table, keys = keys.len(), "allocating memory buckets");

        partition_identifiers(keys, total_buckets)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_utils::person::{PersonRow, base_time};

    #[tokio::test]
    async fn pull_changed_since_includes_checkpoint_instant() {
        let t = base_time();
        let source = MemoryChangeSource::with_rows(vec![
            PersonRow::new("0001", "before", t - Duration::seconds(1)),
            PersonRow::new("0002", "at", t),
            PersonRow::new("0003", "after", t + Duration::seconds(1)),
        ]);

        let rows = source.pull_changed_since(t).await.unwrap();

        let ids: Vec<&str> = rows.iter().map(|row| row.group_key()).collect();
        assert_eq!(ids, vec!["0002", "0003"]);
    }

    #[tokio::test]
    async fn rows_of_one_entity_are_contiguous() {
        let t = base_time();
        let source = MemoryChangeSource::with_rows(vec![
            PersonRow::new("0002", "first", t),
            PersonRow::new("0001", "only", t),
            PersonRow::new("0002", "second", t),
        ]);

        let rows = source.pull_range(&IdRange::unbounded()).await.unwrap();

        let values: Vec<&str> = rows.iter().map(|row| row.value.as_str()).collect();
        assert_eq!(values, vec!["only", "first", "second"]);
    }

    #[tokio::test]
    async fn unreadable_entity_fails_whole_pull() {
        let t = base_time();
        let source = MemoryChangeSource::with_rows(vec![
            PersonRow::new("0001", "ok", t),
            PersonRow::new("0002", "broken", t),
        ]);
        source.mark_unreadable("0002").await;

        let err = source.pull_changed_since(t).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceReadError);
    }
}
