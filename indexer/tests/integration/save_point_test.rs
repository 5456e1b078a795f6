use chrono::{DateTime, Duration, Utc};
use config::shared::{BulkConfig, JobOptions, RunMode, SerializationFailurePolicy};
use indexer::checkpoint::memory::MemoryCheckpointStore;
use indexer::concurrency::shutdown::create_shutdown_channel;
use indexer::error::ErrorKind;
use indexer::flight::{FlightRecord, FlightRecordHandle};
use indexer::index::memory::MemoryIndex;
use indexer::job::tracker::MemoryChangeTracker;
use indexer::job::{Job, JobContext, SavePointJob, SavePointSettings};
use indexer::source::memory::MemoryChangeSource;
use indexer::test_utils::index::FailingIndex;
use indexer::test_utils::person::{PersonMapper, PersonNormalizer, PersonRow, base_time};
use indexer::types::{ChangedEntityIdentifier, JobBatch, RecordChangeOperation};
use telemetry::tracing::init_test_tracing;

const JOB: &str = "person_changes";
const INDEX: &str = "people";

type PersonSavePointJob = SavePointJob<
    MemoryChangeTracker,
    MemoryChangeSource<PersonRow>,
    PersonNormalizer,
    PersonMapper,
    MemoryIndex,
    MemoryCheckpointStore,
>;

fn batch(ids: &[&str], at: DateTime<Utc>) -> JobBatch {
    JobBatch::from_identifiers(
        ids.iter()
            .map(|id| ChangedEntityIdentifier::new(*id, RecordChangeOperation::Update, at))
            .collect(),
    )
}

fn job(
    tracker: &MemoryChangeTracker,
    source: &MemoryChangeSource<PersonRow>,
    index: &MemoryIndex,
    checkpoints: &MemoryCheckpointStore,
) -> PersonSavePointJob {
    SavePointJob::new(
        JOB,
        tracker.clone(),
        source.clone(),
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        SavePointSettings {
            index_name: INDEX.to_string(),
            bulk: BulkConfig::default(),
            on_serialization_failure: SerializationFailurePolicy::Abort,
        },
    )
}

fn context(options: JobOptions) -> JobContext {
    let (_interrupt, shutdown) = create_shutdown_channel();

    JobContext {
        options,
        flight: FlightRecordHandle::new(FlightRecord::start(JOB, 1)),
        shutdown,
    }
}

fn times() -> [DateTime<Utc>; 5] {
    let t0 = base_time();
    [
        t0,
        t0 + Duration::minutes(1),
        t0 + Duration::minutes(2),
        t0 + Duration::minutes(3),
        t0 + Duration::minutes(4),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_batch_keeps_checkpoint_at_last_save_point() {
    init_test_tracing();
    let [t0, t1, t2, t3, t4] = times();
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("a1", "v", t1),
        PersonRow::new("a2", "v", t1),
        PersonRow::new("b1", "v", t2),
        PersonRow::new("brokenId", "v", t3),
        PersonRow::new("c1", "v", t3),
        PersonRow::new("d1", "v", t4),
    ]);
    source.mark_unreadable("brokenId").await;
    let tracker = MemoryChangeTracker::new(
        vec![
            batch(&["a1", "a2"], t1),
            batch(&["b1"], t2),
            batch(&["c1", "brokenId"], t3),
            batch(&["d1"], t4),
        ],
        2,
    );
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t0).await;
    let job = job(&tracker, &source, &index, &checkpoints);

    let err = job.run(context(JobOptions::default())).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceReadError);
    assert_eq!(checkpoints.history(JOB).await, vec![t1, t2]);
    let ids: Vec<String> = index.documents(INDEX).await.into_keys().collect();
    assert_eq!(ids, vec!["a1", "a2", "b1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rerun_resumes_after_last_save_point() {
    init_test_tracing();
    let [t0, t1, t2, _, _] = times();
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("a1", "v", t1),
        PersonRow::new("brokenId", "v", t2),
    ]);
    source.mark_unreadable("brokenId").await;
    let tracker = MemoryChangeTracker::new(
        vec![batch(&["a1"], t1), batch(&["brokenId"], t2)],
        10,
    );
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t0).await;

    assert!(
        job(&tracker, &source, &index, &checkpoints)
            .run(context(JobOptions::default()))
            .await
            .is_err()
    );

    // A fixed source lets the next run pick up the failed batch only.
    let fixed = MemoryChangeSource::with_rows(vec![
        PersonRow::new("a1", "v", t1),
        PersonRow::new("brokenId", "v", t2),
    ]);
    let outcome = job(&tracker, &fixed, &index, &checkpoints)
        .run(context(JobOptions::default()))
        .await
        .unwrap();

    assert_eq!(outcome.records_processed, 1);
    assert_eq!(outcome.checkpoint, Some(t2));
    assert_eq!(fixed.pulls().await, 1);
    assert_eq!(index.documents(INDEX).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn deletes_are_applied_without_loading_rows() {
    init_test_tracing();
    let [t0, t1, t2, _, _] = times();
    let source = MemoryChangeSource::with_rows(vec![PersonRow::new("a1", "v", t1)]);
    let tracker = MemoryChangeTracker::new(
        vec![
            batch(&["a1"], t1),
            JobBatch::from_identifiers(vec![ChangedEntityIdentifier::new(
                "a1",
                RecordChangeOperation::Delete,
                t2,
            )]),
        ],
        1,
    );
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t0).await;

    let outcome = job(&tracker, &source, &index, &checkpoints)
        .run(context(JobOptions::default()))
        .await
        .unwrap();

    assert_eq!(outcome.records_processed, 2);
    assert!(index.documents(INDEX).await.is_empty());
    assert_eq!(source.pulls().await, 1);
    assert_eq!(checkpoints.history(JOB).await, vec![t1, t2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_load_options_are_rejected() {
    init_test_tracing();
    let tracker = MemoryChangeTracker::new(Vec::new(), 1);
    let source = MemoryChangeSource::new();
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let err = job(&tracker, &source, &index, &checkpoints)
        .run(context(JobOptions {
            mode: RunMode::Full,
            ..JobOptions::default()
        }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(checkpoints.stored(JOB).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_bulk_request_stops_run_and_closes_writer() {
    init_test_tracing();
    let [t0, t1, t2, _, _] = times();
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("a1", "v", t1),
        PersonRow::new("a2", "v", t1),
        PersonRow::new("b1", "v", t2),
    ]);
    let tracker = MemoryChangeTracker::new(vec![batch(&["a1", "a2"], t1), batch(&["b1"], t2)], 10);
    let index = FailingIndex::wrap(MemoryIndex::new());
    index.fail_next_bulk_requests(1).await;
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t0).await;
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
            bulk: BulkConfig {
                max_actions: 1,
                max_concurrent_requests: 1,
                ..BulkConfig::default()
            },
            on_serialization_failure: SerializationFailurePolicy::Abort,
        },
    );

    let err = job.run(context(JobOptions::default())).await.unwrap_err();

    // The bulk failure is reported, not a close failure, and closing sends nothing again.
    assert_eq!(err.kind(), ErrorKind::BulkWriteError);
    assert_eq!(index.bulk_attempts().await, 2);
    assert_eq!(checkpoints.history(JOB).await, Vec::<DateTime<Utc>>::new());
    assert!(!index.documents(INDEX).await.contains_key("b1"));
}
