use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::job::{Job, JobContext, JobOutcome};

/// A job whose runs are driven by the test.
///
/// A run signals [`ScriptedJob::wait_started`], then fails if failures are queued, otherwise
/// holds until [`ScriptedJob::release`] or an interruption request.
#[derive(Debug, Clone)]
pub struct ScriptedJob {
    name: String,
    runs: Arc<AtomicU32>,
    failures: Arc<Mutex<Vec<ErrorKind>>>,
    hold: bool,
    started: Arc<Notify>,
    released: Arc<Notify>,
}

impl ScriptedJob {
    /// Creates a job whose runs finish right away.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            runs: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(Mutex::new(Vec::new())),
            hold: false,
            started: Arc::new(Notify::new()),
            released: Arc::new(Notify::new()),
        }
    }

    /// Creates a job whose runs hold until released or interrupted.
    pub fn blocking(name: &str) -> Self {
        Self {
            hold: true,
            ..Self::new(name)
        }
    }

    /// Makes the next runs fail with `kinds`, in order.
    pub async fn fail_with(&self, kinds: &[ErrorKind]) {
        let mut failures = self.failures.lock().await;
        failures.extend(kinds.iter().rev());
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl Job for ScriptedJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut context: JobContext) -> IndexerResult<JobOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(kind) = self.failures.lock().await.pop() {
            bail!(kind, "Scripted job failure");
        }

        if !self.hold {
            context.flight.add_records_processed(1);
            return Ok(JobOutcome {
                records_processed: 1,
                ..JobOutcome::default()
            });
        }

        tokio::select! {
            _ = context.shutdown.wait() => Ok(JobOutcome {
                interrupted: true,
                ..JobOutcome::default()
            }),
            _ = self.released.notified() => {
                context.flight.add_records_processed(1);
                Ok(JobOutcome {
                    records_processed: 1,
                    ..JobOutcome::default()
                })
            }
        }
    }
}
