use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use config::shared::{JobOptions, JobScheduleConfig, SchedulerConfig};
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, IndexerResult};
use crate::flight::{FlightRecord, FlightRecordHandle, FlightRecorder, RunStatus};
use crate::job::{Job, JobContext};
use crate::metrics::{INDEXER_JOB_VETOES_TOTAL, JOB_LABEL};
use crate::reference::ReferenceDataCache;
use crate::scheduler::policy::RetryPolicy;
use crate::scheduler::registry::ExecutingJobs;
use crate::{bail, indexer_error};

/// Recurring trigger of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub every: Duration,
    pub initial_delay: Duration,
    /// Options of every triggered run.
    pub options: JobOptions,
}

impl TriggerSpec {
    pub fn every(every: Duration) -> Self {
        Self {
            every,
            initial_delay: Duration::ZERO,
            options: JobOptions::default(),
        }
    }
}

impl From<&JobScheduleConfig> for TriggerSpec {
    fn from(config: &JobScheduleConfig) -> Self {
        Self {
            every: Duration::from_secs(config.interval_secs),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            options: JobOptions::default(),
        }
    }
}

/// Management handle of a scheduled trigger.
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    enabled: Arc<AtomicBool>,
    executing: Arc<ExecutingJobs>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Makes the trigger skip its ticks. A running execution is not affected.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns true when a new execution would be vetoed because one is running.
    pub fn is_vetoed(&self) -> bool {
        self.executing.contains(&self.name)
    }
}

#[derive(Debug)]
struct SchedulerInner {
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
    executing: Arc<ExecutingJobs>,
    recorder: FlightRecorder,
    retry_policy: RetryPolicy,
    reference_data: Option<ReferenceDataCache>,
    reference_refresh: Duration,
    shutdown: ShutdownTx,
    background: Mutex<JoinSet<()>>,
}

/// Runs registered jobs on demand and on recurring triggers.
///
/// At most one execution of a job name runs at a time; a run requested while one executes is
/// vetoed and recorded as such. Every run gets a [`FlightRecord`], kept in a bounded history.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(config: &SchedulerConfig, reference_data: Option<ReferenceDataCache>) -> Self {
        let (shutdown, _) = create_shutdown_channel();

        let inner = SchedulerInner {
            jobs: RwLock::new(HashMap::new()),
            executing: Arc::new(ExecutingJobs::default()),
            recorder: FlightRecorder::new(config.history_size),
            retry_policy: config.retry_policy.into(),
            reference_data,
            reference_refresh: Duration::from_secs(config.reference_refresh_secs),
            shutdown,
            background: Mutex::new(JoinSet::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Loads the reference data and starts refreshing it.
    pub async fn start(&self) -> IndexerResult<()> {
        if let Some(cache) = &self.inner.reference_data {
            cache.refresh().await?;

            let refresh =
                cache.spawn_refresh_task(self.inner.reference_refresh, self.inner.shutdown.subscribe());
            self.inner.background.lock().await.spawn(async move {
                if let Err(err) = refresh.await {
                    error!(error = %err, "reference data refresh task ended abnormally");
                }
            });
        }

        info!(jobs = self.job_names().len(), "scheduler started");

        Ok(())
    }

    /// Registers a job under its name.
    pub fn register_job(&self, job: Arc<dyn Job>) -> IndexerResult<()> {
        let name = job.name().to_string();
        let mut jobs = self.inner.jobs.write().unwrap_or_else(PoisonError::into_inner);

        if jobs.contains_key(&name) {
            bail!(
                ErrorKind::ConfigError,
                "A job with the same name is already registered",
                name
            );
        }

        debug!(job = %name, "job registered");
        jobs.insert(name, job);

        Ok(())
    }

    pub fn job_names(&self) -> Vec<String> {
        let jobs = self.inner.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts a recurring trigger for a registered job.
    ///
    /// A tick that would overlap a running execution is vetoed. Missed ticks are skipped.
    pub async fn schedule_job(&self, name: &str, trigger: TriggerSpec) -> IndexerResult<JobHandle> {
        self.job(name)?;

        let handle = JobHandle {
            name: name.to_string(),
            enabled: Arc::new(AtomicBool::new(true)),
            executing: self.inner.executing.clone(),
        };

        let scheduler = self.clone();
        let trigger_handle = handle.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        info!(
            job = name,
            every_secs = trigger.every.as_secs(),
            initial_delay_secs = trigger.initial_delay.as_secs(),
            "job scheduled"
        );

        self.inner.background.lock().await.spawn(async move {
            let name = trigger_handle.name().to_string();

            tokio::select! {
                _ = shutdown.wait() => return,
                _ = tokio::time::sleep(trigger.initial_delay) => {}
            }

            let mut ticker = tokio::time::interval(trigger.every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.wait() => {
                        debug!(job = %name, "trigger stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if !trigger_handle.is_enabled() {
                            debug!(job = %name, "trigger disabled, skipping tick");
                            continue;
                        }

                        match scheduler.run_scheduled_job(&name, trigger.options.clone()).await {
                            Ok(record) => debug!(job = %name, status = %record.status, "triggered run finished"),
                            Err(err) if err.kind() == ErrorKind::VetoedExecution => {
                                info!(job = %name, "triggered run vetoed, previous run still executing");
                            }
                            Err(err) => error!(job = %name, error = %err, "triggered run could not start"),
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Runs a registered job now, bypassing its trigger.
    ///
    /// Returns the final [`FlightRecord`] of the run, including failed runs. Fails with
    /// [`ErrorKind::UnknownJob`] for an unregistered name and [`ErrorKind::VetoedExecution`]
    /// when the job is already executing.
    pub async fn run_scheduled_job(
        &self,
        name: &str,
        options: JobOptions,
    ) -> IndexerResult<FlightRecord> {
        self.execute(name.to_string(), options, 1).await
    }

    fn execute(
        &self,
        name: String,
        options: JobOptions,
        attempt: u32,
    ) -> BoxFuture<'static, IndexerResult<FlightRecord>> {
        let scheduler = self.clone();

        async move {
            let job = scheduler.job(&name)?;

            if scheduler.inner.shutdown.is_shutdown() {
                bail!(
                    ErrorKind::InvalidState,
                    "Scheduler is stopping and does not start new runs",
                    name
                );
            }

            let record = FlightRecord::start(name.clone(), attempt);
            let run_id = record.run_id;
            let flight = FlightRecordHandle::new(record);
            let (interrupt_tx, interrupt_rx) = create_shutdown_channel();

            let Some(guard) =
                scheduler
                    .inner
                    .executing
                    .add_executing_job(&name, run_id, interrupt_tx)
            else {
                warn!(job = %name, "execution vetoed, job is already running");
                counter!(INDEXER_JOB_VETOES_TOTAL, JOB_LABEL => name.clone()).increment(1);
                scheduler.inner.recorder.record(FlightRecord::vetoed(name.clone()));

                bail!(
                    ErrorKind::VetoedExecution,
                    "Job is already executing",
                    name
                );
            };

            info!(job = %name, %run_id, attempt, "job execution started");

            let context = JobContext {
                options: options.clone(),
                flight: flight.clone(),
                shutdown: interrupt_rx,
            };
            let result = match tokio::spawn(async move { job.run(context).await }).await {
                Ok(result) => result,
                Err(err) => Err(indexer_error!(ErrorKind::JobPanic, "Job panicked", err)),
            };

            let final_record = match &result {
                Ok(outcome) => {
                    if outcome.interrupted {
                        flight.mark_interrupted();
                    }
                    if let Some(checkpoint) = outcome.checkpoint {
                        flight.set_last_checkpoint(checkpoint);
                    }
                    flight.finish(RunStatus::Succeeded, None)
                }
                Err(err) => {
                    error!(job = %name, %run_id, attempt, error = %err, "job execution failed");
                    flight.finish(RunStatus::Failed, Some(err.to_string()))
                }
            };
            scheduler.inner.recorder.record(final_record.clone());
            drop(guard);

            let Err(err) = result else {
                return Ok(final_record);
            };

            let Some(delay) = scheduler.inner.retry_policy.retry_delay(&err, attempt) else {
                return Ok(final_record);
            };

            info!(job = %name, attempt, delay_ms = delay.as_millis() as u64, "rescheduling failed job");

            let mut shutdown = scheduler.inner.shutdown.subscribe();
            tokio::select! {
                _ = shutdown.wait() => {
                    info!(job = %name, "scheduler stopping, retry dropped");
                    Ok(final_record)
                }
                _ = tokio::time::sleep(delay) => {
                    scheduler.execute(name, options, attempt + 1).await
                }
            }
        }
        .boxed()
    }

    /// Requests interruption of the running execution of `name`.
    ///
    /// Returns false when the job is not executing.
    pub fn interrupt_job(&self, name: &str) -> bool {
        self.inner.executing.interrupt(name)
    }

    /// Returns the names of the jobs currently executing.
    pub fn executing_jobs(&self) -> Vec<String> {
        self.inner.executing.names()
    }

    pub fn flight_history(&self, name: &str) -> Vec<FlightRecord> {
        self.inner.recorder.history(name)
    }

    pub fn last_flight(&self, name: &str) -> Option<FlightRecord> {
        self.inner.recorder.last(name)
    }

    /// Stops triggers and background tasks.
    ///
    /// With `wait_for_completion` the call waits for running executions to finish; otherwise
    /// they are asked to interrupt first and the call waits for them to wind down.
    pub async fn stop(&self, wait_for_completion: bool) {
        info!(
            wait_for_completion,
            executing = self.inner.executing.len(),
            "stopping scheduler"
        );

        self.inner.shutdown.shutdown();
        if !wait_for_completion {
            self.inner.executing.interrupt_all();
        }

        self.inner.executing.wait_idle().await;

        let mut background = self.inner.background.lock().await;
        while let Some(result) = background.join_next().await {
            if let Err(err) = result
                && !err.is_cancelled()
            {
                error!(error = %err, "scheduler background task ended abnormally");
            }
        }

        info!("scheduler stopped");
    }

    fn job(&self, name: &str) -> IndexerResult<Arc<dyn Job>> {
        let jobs = self.inner.jobs.read().unwrap_or_else(PoisonError::into_inner);

        match jobs.get(name) {
            Some(job) => Ok(job.clone()),
            None => bail!(
                ErrorKind::UnknownJob,
                "No job is registered under this name",
                name.to_string()
            ),
        }
    }
}
