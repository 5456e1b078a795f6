use std::fmt;
use std::future::Future;

use chrono::{DateTime, Months, Utc};

use crate::error::IndexerResult;

/// Age, in years, of the checkpoint reported for a job that never ran.
pub const NEVER_RUN_YEARS: u32 = 50;

/// Last successful run time of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    last_successful_run_time: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(last_successful_run_time: DateTime<Utc>) -> Self {
        Self {
            last_successful_run_time,
        }
    }

    /// Returns the checkpoint reported for a job without a stored checkpoint.
    pub fn never_run(now: DateTime<Utc>) -> Self {
        let time = now
            .checked_sub_months(Months::new(NEVER_RUN_YEARS * 12))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self::new(time)
    }

    pub fn last_successful_run_time(&self) -> DateTime<Utc> {
        self.last_successful_run_time
    }

    /// Returns true when the checkpoint is so old that the job must be considered never run.
    pub fn is_never_run(&self, now: DateTime<Utc>) -> bool {
        self.last_successful_run_time <= Self::never_run(now).last_successful_run_time
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.last_successful_run_time)
    }
}

/// Durable, per-job store of checkpoints.
///
/// [`CheckpointStore::advance`] never moves a checkpoint backward and returns only once the
/// new value is durable.
pub trait CheckpointStore {
    /// Reads the checkpoint of `job`, or [`Checkpoint::never_run`] when none is stored.
    fn read(&self, job: &str) -> impl Future<Output = IndexerResult<Checkpoint>> + Send;

    /// Advances the checkpoint of `job` to `to` and returns the stored checkpoint.
    ///
    /// A value at or before the stored checkpoint leaves it untouched.
    fn advance(
        &self,
        job: &str,
        to: DateTime<Utc>,
    ) -> impl Future<Output = IndexerResult<Checkpoint>> + Send;
}
