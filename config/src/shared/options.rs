use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How one run of an indexer job loads data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Index what changed since the last checkpoint, or everything on a first run.
    #[default]
    Incremental,
    /// Reload every bucket of the driver table.
    Full,
    /// Reload the buckets between `start_bucket` and `end_bucket`, inclusive.
    BucketRange,
    /// Drop and recreate the index before a full reload.
    DropIndex,
}

impl RunMode {
    pub fn is_full_load(&self) -> bool {
        !matches!(self, RunMode::Incremental)
    }
}

/// Options of a single run, as parsed from the command line or set by a trigger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobOptions {
    #[serde(default)]
    pub mode: RunMode,
    /// Overrides the configured number of buckets of a full load.
    pub total_buckets: Option<u32>,
    /// First bucket processed in [`RunMode::BucketRange`], starting at 1.
    pub start_bucket: Option<u32>,
    /// Last bucket processed in [`RunMode::BucketRange`], inclusive.
    pub end_bucket: Option<u32>,
    /// Overrides the configured number of concurrent bucket workers.
    pub thread_count: Option<usize>,
    /// Lower bound of an explicit id range, inclusive.
    pub min_id: Option<String>,
    /// Upper bound of an explicit id range, exclusive.
    pub max_id: Option<String>,
    /// Index access-restricted records instead of deleting them.
    #[serde(default)]
    pub include_restricted: bool,
    pub index_name: Option<String>,
    /// Use this timestamp instead of the stored checkpoint.
    pub last_run_time: Option<DateTime<Utc>>,
}

impl JobOptions {
    pub fn full() -> Self {
        Self {
            mode: RunMode::Full,
            ..Self::default()
        }
    }

    /// Returns the `(start, end)` bucket numbers to process out of `total` buckets.
    pub fn bucket_range(&self, total: u32) -> Result<(u32, u32), ValidationError> {
        let (start, end) = match self.mode {
            RunMode::BucketRange => (
                self.start_bucket.unwrap_or(1),
                self.end_bucket.unwrap_or(total),
            ),
            _ => (1, total),
        };

        if total == 0 || start == 0 || start > end || end > total {
            return Err(ValidationError::InvalidBucketRange { start, end, total });
        }

        Ok((start, end))
    }

    /// Returns true when the run is limited to an explicit id range.
    pub fn has_id_range(&self) -> bool {
        self.min_id.is_some() || self.max_id.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(0) = self.total_buckets {
            return Err(ValidationError::invalid(
                "options.total_buckets",
                "must be greater than 0",
            ));
        }

        if let Some(0) = self.thread_count {
            return Err(ValidationError::invalid(
                "options.thread_count",
                "must be greater than 0",
            ));
        }

        if let (Some(min), Some(max)) = (&self.min_id, &self.max_id)
            && min >= max
        {
            return Err(ValidationError::invalid(
                "options.min_id",
                "must be lower than max_id",
            ));
        }

        Ok(())
    }
}
