use std::sync::Arc;

use chrono::Duration;
use config::shared::{BulkConfig, JobOptions, PipelineConfig, RetryPolicyConfig, SchedulerConfig, SerializationFailurePolicy};
use indexer::checkpoint::memory::MemoryCheckpointStore;
use indexer::concurrency::shutdown::create_shutdown_channel;
use indexer::error::ErrorKind;
use indexer::failpoints::{BEFORE_BATCH_LOAD, BEFORE_BULK_REQUEST, BEFORE_CHECKPOINT_ADVANCE};
use indexer::flight::{FlightRecord, FlightRecordHandle, RunStatus};
use indexer::index::memory::MemoryIndex;
use indexer::job::tracker::MemoryChangeTracker;
use indexer::job::{IndexerJob, IndexerJobSettings, Job, JobContext, SavePointJob, SavePointSettings};
use indexer::scheduler::JobScheduler;
use indexer::source::memory::MemoryChangeSource;
use indexer::test_utils::failpoints::IndexerFailScenario;
use indexer::test_utils::person::{PersonMapper, PersonNormalizer, PersonRow, base_time};
use indexer::types::{ChangedEntityIdentifier, JobBatch, RecordChangeOperation};
use telemetry::tracing::init_test_tracing;

const JOB: &str = "people";
const INDEX: &str = "people";

fn settings() -> IndexerJobSettings {
    IndexerJobSettings {
        driver_table: "person".to_string(),
        index_name: INDEX.to_string(),
        pipeline: PipelineConfig {
            reader_queue_capacity: 16,
            normalizer_queue_capacity: 8,
            ..PipelineConfig::default()
        },
        bulk: BulkConfig::default(),
    }
}

fn context() -> JobContext {
    let (_interrupt, shutdown) = create_shutdown_channel();

    JobContext {
        options: JobOptions::default(),
        flight: FlightRecordHandle::new(FlightRecord::start(JOB, 1)),
        shutdown,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_checkpoint_advance_keeps_previous_checkpoint() {
    init_test_tracing();
    let _scenario = IndexerFailScenario::setup(&[(BEFORE_CHECKPOINT_ADVANCE, "return")]);

    let t = base_time();
    let source = MemoryChangeSource::with_rows(vec![PersonRow::new("0001", "v", t)]);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t).await;
    let job = IndexerJob::new(
        JOB,
        source,
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        settings(),
    );

    let err = job.run(context()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    // Documents are upserts, so the rerun after the failure reindexes them harmlessly.
    assert_eq!(index.documents(INDEX).await.len(), 1);
    assert_eq!(
        checkpoints.stored(JOB).await.map(|c| c.last_successful_run_time()),
        Some(t)
    );
    assert!(checkpoints.history(JOB).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_load_stops_save_point_run() {
    init_test_tracing();
    let _scenario = IndexerFailScenario::setup(&[(BEFORE_BATCH_LOAD, "1*off->return")]);

    let t = base_time();
    let t1 = t + Duration::minutes(1);
    let t2 = t + Duration::minutes(2);
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("a1", "v", t1),
        PersonRow::new("b1", "v", t2),
    ]);
    let batch = |id: &str, at| {
        JobBatch::from_identifiers(vec![ChangedEntityIdentifier::new(
            id,
            RecordChangeOperation::Insert,
            at,
        )])
    };
    let tracker = MemoryChangeTracker::new(vec![batch("a1", t1), batch("b1", t2)], 5);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t).await;
    let job = SavePointJob::new(
        JOB,
        tracker,
        source,
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        SavePointSettings {
            index_name: INDEX.to_string(),
            bulk: BulkConfig::default(),
            on_serialization_failure: SerializationFailurePolicy::Skip,
        },
    );

    let err = job.run(context()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    assert_eq!(checkpoints.history(JOB).await, vec![t1]);
    let ids: Vec<String> = index.documents(INDEX).await.into_keys().collect();
    assert_eq!(ids, vec!["a1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_bulk_failure_is_rescheduled_by_scheduler() {
    init_test_tracing();
    let _scenario =
        IndexerFailScenario::setup(&[(BEFORE_BULK_REQUEST, "1*return(timed_retry)->off")]);

    let source = MemoryChangeSource::with_rows(vec![PersonRow::new("0001", "v", base_time())]);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();
    let job = IndexerJob::new(
        JOB,
        source,
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        settings(),
    );

    let scheduler = JobScheduler::new(
        &SchedulerConfig {
            retry_policy: RetryPolicyConfig::Reschedule {
                delay_ms: 10,
                max_attempts: 2,
            },
            ..SchedulerConfig::default()
        },
        None,
    );
    scheduler.register_job(Arc::new(job)).unwrap();

    let record = scheduler
        .run_scheduled_job(JOB, JobOptions::default())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.attempt, 2);
    assert_eq!(index.documents(INDEX).await.len(), 1);
    assert!(checkpoints.stored(JOB).await.is_some());

    let history = scheduler.flight_history(JOB);
    assert_eq!(history[0].status, RunStatus::Failed);
}
