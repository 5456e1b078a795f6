use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open range of entity ids, `[min_id, max_id)`.
///
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IdRange {
    pub min_id: Option<String>,
    pub max_id: Option<String>,
}

impl IdRange {
    /// A range covering every id.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(min_id: Option<String>, max_id: Option<String>) -> Self {
        Self { min_id, max_id }
    }

    pub fn contains(&self, id: &str) -> bool {
        let above_min = self.min_id.as_deref().is_none_or(|min| id >= min);
        let below_max = self.max_id.as_deref().is_none_or(|max| id < max);

        above_min && below_max
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.min_id.as_deref().unwrap_or("-inf"),
            self.max_id.as_deref().unwrap_or("+inf")
        )
    }
}

/// One partition of a full load.
///
/// Buckets of one allocation are ordered by number and chain together: the `max_id` of a
/// bucket is the `min_id` of the next one and the last bucket has no upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchBucket {
    pub bucket_number: u32,
    pub min_id: String,
    /// Exclusive upper bound, `None` for the last bucket.
    pub max_id: Option<String>,
    pub row_count: u64,
}

impl BatchBucket {
    /// Returns the id range covered by this bucket.
    pub fn range(&self) -> IdRange {
        IdRange::new(Some(self.min_id.clone()), self.max_id.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        id >= self.min_id.as_str() && self.max_id.as_deref().is_none_or(|max| id < max)
    }
}

impl fmt::Display for BatchBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket {} {} ({} rows)",
            self.bucket_number,
            self.range(),
            self.row_count
        )
    }
}
