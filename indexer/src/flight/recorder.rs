use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::counter;
use tracing::info;

use crate::flight::{FlightRecord, RunStatus};
use crate::metrics::{INDEXER_JOB_RUNS_TOTAL, JOB_LABEL, STATUS_LABEL};

/// Bounded per-job history of finished runs.
#[derive(Debug, Clone)]
pub struct FlightRecorder {
    history_size: usize,
    runs: Arc<Mutex<HashMap<String, VecDeque<FlightRecord>>>>,
}

impl FlightRecorder {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stores a finished record, evicting the oldest one of the job when the history is full.
    pub fn record(&self, record: FlightRecord) {
        counter!(
            INDEXER_JOB_RUNS_TOTAL,
            JOB_LABEL => record.job.clone(),
            STATUS_LABEL => record.status.as_str()
        )
        .increment(1);

        if record.status != RunStatus::Vetoed {
            info!(
                job = %record.job,
                run_id = %record.run_id,
                attempt = record.attempt,
                status = %record.status,
                records = record.records_processed,
                interrupted = record.interrupted,
                "job run recorded"
            );
        }

        let mut runs = self.lock();
        let history = runs.entry(record.job.clone()).or_default();
        if history.len() == self.history_size {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Returns the runs of `job`, oldest first.
    pub fn history(&self, job: &str) -> Vec<FlightRecord> {
        self.lock()
            .get(job)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last(&self, job: &str) -> Option<FlightRecord> {
        self.lock().get(job)?.back().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<FlightRecord>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
