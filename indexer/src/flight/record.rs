use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Status of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Vetoed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Vetoed => "vetoed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable record of one job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightRecord {
    pub run_id: Uuid,
    pub job: String,
    /// One for the first execution, incremented by every rescheduled retry.
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub status: RunStatus,
    /// Checkpoint stored by the latest advance of this run.
    pub last_checkpoint: Option<DateTime<Utc>>,
    /// True when the run stopped early because an interruption was requested.
    pub interrupted: bool,
    pub time_left: Option<Duration>,
    pub error: Option<String>,
}

impl FlightRecord {
    pub fn start(job: impl Into<String>, attempt: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job: job.into(),
            attempt,
            start_time: Utc::now(),
            end_time: None,
            records_processed: 0,
            status: RunStatus::Running,
            last_checkpoint: None,
            interrupted: false,
            time_left: None,
            error: None,
        }
    }

    /// Builds the already finished record of a refused run.
    pub fn vetoed(job: impl Into<String>) -> Self {
        let mut record = Self::start(job, 1);
        record.status = RunStatus::Vetoed;
        record.end_time = Some(record.start_time);

        record
    }
}

/// Shared, mutable view of a running [`FlightRecord`].
///
/// Jobs update progress through the handle while the scheduler owns the record. Once the status
/// leaves [`RunStatus::Running`] every mutation is ignored.
#[derive(Debug, Clone)]
pub struct FlightRecordHandle {
    record: Arc<Mutex<FlightRecord>>,
}

impl FlightRecordHandle {
    pub fn new(record: FlightRecord) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
        }
    }

    /// Returns a copy of the current record.
    pub fn snapshot(&self) -> FlightRecord {
        self.lock().clone()
    }

    pub fn job(&self) -> String {
        self.lock().job.clone()
    }

    pub fn add_records_processed(&self, records: u64) {
        self.update(|record| record.records_processed += records);
    }

    pub fn set_last_checkpoint(&self, checkpoint: DateTime<Utc>) {
        self.update(|record| record.last_checkpoint = Some(checkpoint));
    }

    pub fn set_time_left(&self, time_left: Duration) {
        self.update(|record| record.time_left = Some(time_left));
    }

    pub fn mark_interrupted(&self) {
        self.update(|record| record.interrupted = true);
    }

    /// Moves the record to its final status and returns the final copy.
    pub(crate) fn finish(&self, status: RunStatus, error: Option<String>) -> FlightRecord {
        let mut record = self.lock();

        if record.status == RunStatus::Running {
            record.status = status;
            record.error = error;
            record.end_time = Some(Utc::now());
            if status == RunStatus::Succeeded {
                record.time_left = Some(Duration::ZERO);
            }
        }

        record.clone()
    }

    fn update(&self, f: impl FnOnce(&mut FlightRecord)) {
        let mut record = self.lock();
        if record.status == RunStatus::Running {
            f(&mut record);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlightRecord> {
        // A panicking job cannot leave the record half-written, every update is a single store.
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_record_is_frozen() {
        let handle = FlightRecordHandle::new(FlightRecord::start("people", 1));
        handle.add_records_processed(5);

        let finished = handle.finish(RunStatus::Failed, Some("boom".into()));
        handle.add_records_processed(7);
        handle.mark_interrupted();
        let again = handle.finish(RunStatus::Succeeded, None);

        assert_eq!(finished.status, RunStatus::Failed);
        assert_eq!(again, finished);
        assert_eq!(handle.snapshot().records_processed, 5);
        assert!(finished.end_time.is_some());
    }

    #[test]
    fn vetoed_record_is_finished() {
        let record = FlightRecord::vetoed("people");

        assert!(record.status.is_finished());
        assert_eq!(record.end_time, Some(record.start_time));
    }
}
