use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::gauge;
use tracing::debug;

use crate::flight::{FlightRecordHandle, TimeLeftEstimator};
use crate::metrics::{INDEXER_JOB_TIME_LEFT_SECONDS, JOB_LABEL};

/// Publishes the progress of a run to its flight record.
#[derive(Debug, Clone)]
pub struct RunProgress {
    job: String,
    flight: FlightRecordHandle,
    estimator: Arc<Mutex<TimeLeftEstimator>>,
}

impl RunProgress {
    pub fn new(job: impl Into<String>, flight: FlightRecordHandle, total_batches: u32) -> Self {
        Self {
            job: job.into(),
            flight,
            estimator: Arc::new(Mutex::new(TimeLeftEstimator::new(total_batches))),
        }
    }

    pub fn flight(&self) -> &FlightRecordHandle {
        &self.flight
    }

    pub fn add_planned_batches(&self, batches: u32) {
        self.estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_planned_batches(batches);
    }

    /// Marks one more batch complete and refreshes the time left.
    pub fn batch_completed(&self, records: u64) -> Duration {
        let time_left = {
            let mut estimator = self.estimator.lock().unwrap_or_else(PoisonError::into_inner);
            let completed = estimator.completed_batches();
            estimator.mark_batch_completed(completed);
            estimator.estimate()
        };

        self.flight.add_records_processed(records);
        self.flight.set_time_left(time_left);
        gauge!(INDEXER_JOB_TIME_LEFT_SECONDS, JOB_LABEL => self.job.clone())
            .set(time_left.as_secs_f64());

        debug!(job = %self.job, records, time_left_secs = time_left.as_secs(), "batch completed");

        time_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::FlightRecord;

    #[test]
    fn last_batch_reports_no_time_left() {
        let flight = FlightRecordHandle::new(FlightRecord::start("people", 1));
        let progress = RunProgress::new("people", flight.clone(), 2);

        progress.batch_completed(10);
        let last = progress.batch_completed(5);

        assert_eq!(last, Duration::ZERO);
        let record = flight.snapshot();
        assert_eq!(record.records_processed, 15);
        assert_eq!(record.time_left, Some(Duration::ZERO));
    }
}
