use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::shared::JobOptions;

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::IndexerResult;
use crate::flight::FlightRecordHandle;

/// Everything a job receives for one run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub options: JobOptions,
    /// Record of the run, owned by the scheduler.
    pub flight: FlightRecordHandle,
    /// Signals a cooperative interruption request.
    pub shutdown: ShutdownRx,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub records_processed: u64,
    /// True when the run stopped early on an interruption request.
    pub interrupted: bool,
    /// Checkpoint stored by the run, if it advanced one.
    pub checkpoint: Option<DateTime<Utc>>,
}

/// A unit of work the scheduler runs by name.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self, context: JobContext) -> IndexerResult<JobOutcome>;
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name()).finish()
    }
}
