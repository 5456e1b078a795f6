use std::sync::Arc;
use std::time::Duration;

use config::shared::{JobOptions, RetryPolicyConfig, SchedulerConfig};
use indexer::error::ErrorKind;
use indexer::flight::RunStatus;
use indexer::scheduler::{JobScheduler, TriggerSpec};
use indexer::test_utils::job::ScriptedJob;
use telemetry::tracing::init_test_tracing;
use tokio::time::timeout;

fn scheduler(retry_policy: RetryPolicyConfig) -> JobScheduler {
    let config = SchedulerConfig {
        retry_policy,
        ..SchedulerConfig::default()
    };

    JobScheduler::new(&config, None)
}

fn register(scheduler: &JobScheduler, job: &ScriptedJob) {
    scheduler.register_job(Arc::new(job.clone())).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_of_executing_job_is_vetoed() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::blocking("people");
    register(&scheduler, &job);

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_scheduled_job("people", JobOptions::default()).await })
    };
    job.wait_started().await;

    let err = scheduler
        .run_scheduled_job("people", JobOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VetoedExecution);
    assert_eq!(scheduler.executing_jobs(), vec!["people".to_string()]);
    assert_eq!(job.runs(), 1);

    job.release();
    let record = first.await.unwrap().unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(scheduler.executing_jobs().is_empty());
    let statuses: Vec<RunStatus> = scheduler
        .flight_history("people")
        .iter()
        .map(|record| record.status)
        .collect();
    assert_eq!(statuses, vec![RunStatus::Vetoed, RunStatus::Succeeded]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_job_is_rejected() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);

    let err = scheduler
        .run_scheduled_job("missing", JobOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownJob);

    let err = scheduler
        .schedule_job("missing", TriggerSpec::every(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownJob);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_registration_is_rejected() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    register(&scheduler, &ScriptedJob::new("people"));

    let err = scheduler
        .register_job(Arc::new(ScriptedJob::new("people")))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_run_is_recorded_and_waits_for_operator() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::new("people");
    job.fail_with(&[ErrorKind::BulkWriteError]).await;
    register(&scheduler, &job);

    let record = scheduler
        .run_scheduled_job("people", JobOptions::default())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.is_some());
    assert!(record.end_time.is_some());
    assert_eq!(job.runs(), 1);
    assert!(scheduler.executing_jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_failure_is_rescheduled() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Reschedule {
        delay_ms: 10,
        max_attempts: 3,
    });
    let job = ScriptedJob::new("people");
    job.fail_with(&[ErrorKind::BulkWriteError, ErrorKind::SourceReadError])
        .await;
    register(&scheduler, &job);

    let record = scheduler
        .run_scheduled_job("people", JobOptions::default())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.attempt, 3);
    assert_eq!(job.runs(), 3);
    assert_eq!(scheduler.flight_history("people").len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn configuration_failure_is_not_rescheduled() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Reschedule {
        delay_ms: 10,
        max_attempts: 3,
    });
    let job = ScriptedJob::new("people");
    job.fail_with(&[ErrorKind::ConfigError]).await;
    register(&scheduler, &job);

    let record = scheduler
        .run_scheduled_job("people", JobOptions::default())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(job.runs(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_run_succeeds_as_interrupted() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::blocking("people");
    register(&scheduler, &job);

    let run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_scheduled_job("people", JobOptions::default()).await })
    };
    job.wait_started().await;

    assert!(scheduler.interrupt_job("people"));
    assert!(!scheduler.interrupt_job("cases"));

    let record = run.await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(record.interrupted);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_waiting_interrupts_running_jobs() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::blocking("people");
    register(&scheduler, &job);

    let run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_scheduled_job("people", JobOptions::default()).await })
    };
    job.wait_started().await;

    timeout(Duration::from_secs(5), scheduler.stop(false))
        .await
        .unwrap();

    assert!(run.await.unwrap().unwrap().interrupted);
    assert_eq!(
        scheduler
            .run_scheduled_job("people", JobOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidState
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_waiting_for_completion_lets_jobs_finish() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::blocking("people");
    register(&scheduler, &job);

    let run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_scheduled_job("people", JobOptions::default()).await })
    };
    job.wait_started().await;

    let stop = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.stop(true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stop.is_finished());

    job.release();
    timeout(Duration::from_secs(5), stop).await.unwrap().unwrap();

    let record = run.await.unwrap().unwrap();
    assert!(!record.interrupted);
    assert_eq!(record.records_processed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_runs_job_until_disabled() {
    init_test_tracing();
    let scheduler = scheduler(RetryPolicyConfig::Manual);
    let job = ScriptedJob::new("people");
    register(&scheduler, &job);

    let handle = scheduler
        .schedule_job("people", TriggerSpec::every(Duration::from_millis(20)))
        .await
        .unwrap();

    timeout(Duration::from_secs(5), async {
        while job.runs() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    handle.disable();
    assert!(!handle.is_enabled());
    // A tick that already fired may still be running.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let runs = job.runs();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(job.runs(), runs);
    assert!(!handle.is_vetoed());

    scheduler.stop(true).await;
    assert!(
        scheduler
            .flight_history("people")
            .iter()
            .all(|record| record.status == RunStatus::Succeeded)
    );
}
