use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::concurrency::shutdown::ShutdownTx;

#[derive(Debug)]
struct ExecutingJob {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    interrupt: ShutdownTx,
}

/// Registry of the jobs currently executing, keyed by job name.
///
/// A name is present for exactly as long as an [`ExecutionGuard`] for it is alive.
#[derive(Debug, Default)]
pub struct ExecutingJobs {
    jobs: Mutex<HashMap<String, ExecutingJob>>,
    idle: Notify,
}

impl ExecutingJobs {
    /// Registers an execution of `name`, or returns `None` when one is already executing.
    pub fn add_executing_job(
        self: &Arc<Self>,
        name: &str,
        run_id: Uuid,
        interrupt: ShutdownTx,
    ) -> Option<ExecutionGuard> {
        let mut jobs = self.lock();
        if jobs.contains_key(name) {
            return None;
        }

        jobs.insert(
            name.to_string(),
            ExecutingJob {
                run_id,
                started_at: Utc::now(),
                interrupt,
            },
        );
        debug!(job = name, %run_id, "job execution registered");

        Some(ExecutionGuard {
            registry: self.clone(),
            name: name.to_string(),
        })
    }

    /// Removes the execution of `name` and wakes waiters once nothing executes.
    pub fn remove_executing_job(&self, name: &str) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.remove(name) {
            let elapsed = Utc::now() - job.started_at;
            debug!(
                job = name,
                run_id = %job.run_id,
                elapsed_ms = elapsed.num_milliseconds(),
                "job execution removed"
            );
        }

        if jobs.is_empty() {
            self.idle.notify_waiters();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the names of the executing jobs, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Requests interruption of the execution of `name`, returning false if it is not executing.
    pub fn interrupt(&self, name: &str) -> bool {
        match self.lock().get(name) {
            Some(job) => {
                info!(job = name, run_id = %job.run_id, "interrupting job");
                job.interrupt.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn interrupt_all(&self) {
        for (name, job) in self.lock().iter() {
            info!(job = %name, run_id = %job.run_id, "interrupting job");
            job.interrupt.shutdown();
        }
    }

    /// Waits until no job executes.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }

            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExecutingJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a job registered as executing, removing it when dropped.
///
/// Dropping happens on success, failure and panic alike.
#[derive(Debug)]
pub struct ExecutionGuard {
    registry: Arc<ExecutingJobs>,
    name: String,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.registry.remove_executing_job(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    #[test]
    fn second_execution_of_same_job_is_refused() {
        let registry = Arc::new(ExecutingJobs::default());
        let (tx, _rx) = create_shutdown_channel();

        let guard = registry.add_executing_job("people", Uuid::new_v4(), tx.clone());
        let second = registry.add_executing_job("people", Uuid::new_v4(), tx.clone());

        assert!(guard.is_some());
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
        assert!(registry.add_executing_job("people", Uuid::new_v4(), tx).is_some());
    }

    #[test]
    fn interrupt_reaches_running_job() {
        let registry = Arc::new(ExecutingJobs::default());
        let (tx, rx) = create_shutdown_channel();
        let _guard = registry.add_executing_job("people", Uuid::new_v4(), tx);

        assert!(registry.interrupt("people"));
        assert!(!registry.interrupt("cases"));
        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn wait_idle_returns_when_last_guard_drops() {
        let registry = Arc::new(ExecutingJobs::default());
        let (tx, _rx) = create_shutdown_channel();
        let guard = registry.add_executing_job("people", Uuid::new_v4(), tx);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
