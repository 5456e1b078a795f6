use std::fmt;
use std::marker::PhantomData;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::types::ChangeRow;

/// Reduces the rows sharing one group key into a single entity.
pub trait EntityNormalizer<R>: Send + Sync + 'static
where
    R: ChangeRow,
{
    type Entity: fmt::Debug + Send + Sync + 'static;

    /// Reduces a non-empty run of rows with the same group key, in source order.
    fn reduce(&self, rows: Vec<R>) -> IndexerResult<Self::Entity>;

    /// Returns false when every row is already a complete entity.
    ///
    /// Non-grouping normalizers receive one row at a time.
    fn groups_rows(&self) -> bool {
        true
    }
}

/// Normalizer for sources without a denormalized view, treating each row as an entity.
pub struct PassThroughNormalizer<R> {
    _row: PhantomData<fn() -> R>,
}

impl<R> PassThroughNormalizer<R> {
    pub fn new() -> Self {
        Self { _row: PhantomData }
    }
}

impl<R> Default for PassThroughNormalizer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for PassThroughNormalizer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassThroughNormalizer")
    }
}

impl<R> EntityNormalizer<R> for PassThroughNormalizer<R>
where
    R: ChangeRow,
{
    type Entity = R;

    fn reduce(&self, rows: Vec<R>) -> IndexerResult<R> {
        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => bail!(ErrorKind::InvalidState, "No row to normalize"),
            (Some(row), Some(_)) => bail!(
                ErrorKind::InvalidState,
                "Pass-through normalization got several rows",
                row.group_key()
            ),
        }
    }

    fn groups_rows(&self) -> bool {
        false
    }
}
