use chrono::Duration;
use config::shared::{BulkConfig, JobOptions, PipelineConfig, RunMode, SerializationFailurePolicy};
use indexer::checkpoint::memory::MemoryCheckpointStore;
use indexer::concurrency::shutdown::create_shutdown_channel;
use indexer::flight::{FlightRecord, FlightRecordHandle};
use indexer::index::memory::MemoryIndex;
use indexer::index::{IndexAction, IndexClient};
use indexer::job::{IndexerJob, IndexerJobSettings, Job, JobContext, JobOutcome};
use indexer::source::memory::MemoryChangeSource;
use indexer::test_utils::person::{PersonMapper, PersonNormalizer, PersonRow, base_time};
use serde_json::json;
use telemetry::tracing::init_test_tracing;

const JOB: &str = "people";
const INDEX: &str = "people_v1";

type PersonJob = IndexerJob<
    MemoryChangeSource<PersonRow>,
    PersonNormalizer,
    PersonMapper,
    MemoryIndex,
    MemoryCheckpointStore,
>;

fn settings() -> IndexerJobSettings {
    IndexerJobSettings {
        driver_table: "person".to_string(),
        index_name: INDEX.to_string(),
        pipeline: PipelineConfig {
            reader_queue_capacity: 16,
            normalizer_queue_capacity: 8,
            bucket_workers: 2,
            total_buckets: 4,
            ..PipelineConfig::default()
        },
        bulk: BulkConfig {
            max_actions: 50,
            ..BulkConfig::default()
        },
    }
}

fn person_job(
    source: &MemoryChangeSource<PersonRow>,
    index: &MemoryIndex,
    checkpoints: &MemoryCheckpointStore,
) -> PersonJob {
    IndexerJob::new(
        JOB,
        source.clone(),
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        settings(),
    )
}

async fn run(job: &PersonJob, options: JobOptions) -> (JobOutcome, FlightRecord) {
    let (_interrupt, shutdown) = create_shutdown_channel();
    let flight = FlightRecordHandle::new(FlightRecord::start(JOB, 1));
    let context = JobContext {
        options,
        flight: flight.clone(),
        shutdown,
    };

    let outcome = job.run(context).await.unwrap();

    (outcome, flight.snapshot())
}

fn people(count: usize) -> Vec<PersonRow> {
    (0..count)
        .flat_map(|n| {
            let id = format!("{n:04}");
            [
                PersonRow::new(&id, "first", base_time()),
                PersonRow::new(&id, "second", base_time()),
            ]
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn first_run_indexes_everything_and_stores_checkpoint() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(25));
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let (outcome, record) = run(
        &person_job(&source, &index, &checkpoints),
        JobOptions::default(),
    )
    .await;

    let documents = index.documents(INDEX).await;
    assert_eq!(documents.len(), 25);
    assert_eq!(documents["0007"], json!({"id": "0007", "values": ["first", "second"]}));
    assert_eq!(outcome.records_processed, 25);
    assert!(checkpoints.stored(JOB).await.is_some());
    assert_eq!(record.last_checkpoint, outcome.checkpoint);
    assert_eq!(record.records_processed, 25);
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_run_indexes_changes_at_or_after_checkpoint() {
    init_test_tracing();
    let t = base_time();
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("0001", "before", t - Duration::seconds(1)),
        PersonRow::new("0002", "at", t),
        PersonRow::new("0003", "after", t + Duration::seconds(1)),
    ]);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(JOB, t).await;

    let (outcome, _) = run(
        &person_job(&source, &index, &checkpoints),
        JobOptions::default(),
    )
    .await;

    let ids: Vec<String> = index.documents(INDEX).await.into_keys().collect();
    assert_eq!(ids, vec!["0002", "0003"]);

    let advanced = checkpoints.stored(JOB).await.unwrap();
    assert!(advanced.last_successful_run_time() > t);
    assert_eq!(outcome.checkpoint, Some(advanced.last_successful_run_time()));
}

#[tokio::test(flavor = "multi_thread")]
async fn full_load_covers_every_bucket() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(1000));
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let options = JobOptions {
        total_buckets: Some(4),
        thread_count: Some(2),
        ..JobOptions::full()
    };
    let (outcome, record) = run(&person_job(&source, &index, &checkpoints), options).await;

    assert_eq!(index.documents(INDEX).await.len(), 1000);
    assert_eq!(outcome.records_processed, 1000);
    assert!(!outcome.interrupted);
    assert_eq!(checkpoints.history(JOB).await.len(), 1);
    assert_eq!(record.records_processed, 1000);

    // The 50 action threshold splits every bucket into several requests.
    let requests = index.bulk_requests().await;
    assert!(requests.len() >= 20);
    assert!(requests.iter().all(|actions| *actions <= 50));
}

#[tokio::test(flavor = "multi_thread")]
async fn bucket_range_run_leaves_checkpoint_unchanged() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(400));
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let options = JobOptions {
        mode: RunMode::BucketRange,
        total_buckets: Some(4),
        start_bucket: Some(2),
        end_bucket: Some(3),
        ..JobOptions::default()
    };
    let (outcome, _) = run(&person_job(&source, &index, &checkpoints), options).await;

    let documents = index.documents(INDEX).await;
    assert!(!documents.is_empty());
    assert!(documents.len() < 400);
    assert_eq!(documents.len(), 200);
    assert_eq!(outcome.records_processed, 200);
    assert!(!documents.contains_key("0000"));
    assert!(!documents.contains_key("0399"));
    assert_eq!(checkpoints.stored(JOB).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn id_range_run_indexes_only_the_range() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(30));
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let options = JobOptions {
        min_id: Some("0010".to_string()),
        max_id: Some("0020".to_string()),
        ..JobOptions::default()
    };
    run(&person_job(&source, &index, &checkpoints), options).await;

    let ids: Vec<String> = index.documents(INDEX).await.into_keys().collect();
    assert_eq!(ids.len(), 10);
    assert_eq!(ids.first().map(String::as_str), Some("0010"));
    assert_eq!(ids.last().map(String::as_str), Some("0019"));
    assert_eq!(checkpoints.stored(JOB).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn restricted_entities_are_deleted_from_the_index() {
    init_test_tracing();
    let t = base_time();
    let source = MemoryChangeSource::with_rows(vec![
        PersonRow::new("0001", "open", t),
        PersonRow::new("0002", "open", t),
    ]);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();
    let job = person_job(&source, &index, &checkpoints);

    run(&job, JobOptions::full()).await;
    assert_eq!(index.documents(INDEX).await.len(), 2);

    source
        .insert_rows([PersonRow::restricted("0002", "sealed", t + Duration::hours(1))])
        .await;
    let options = JobOptions {
        last_run_time: Some(t + Duration::minutes(30)),
        ..JobOptions::default()
    };
    run(&job, options).await;

    let ids: Vec<String> = index.documents(INDEX).await.into_keys().collect();
    assert_eq!(ids, vec!["0001"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn drop_index_mode_removes_stale_documents() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(5));
    let index = MemoryIndex::new();
    index
        .bulk(
            INDEX,
            vec![IndexAction::Upsert {
                id: "stale".to_string(),
                document: json!({"id": "stale"}),
            }],
        )
        .await
        .unwrap();
    let checkpoints = MemoryCheckpointStore::new();

    let options = JobOptions {
        mode: RunMode::DropIndex,
        ..JobOptions::default()
    };
    let (outcome, _) = run(&person_job(&source, &index, &checkpoints), options).await;

    let documents = index.documents(INDEX).await;
    assert_eq!(documents.len(), 5);
    assert!(!documents.contains_key("stale"));
    // The rebuilt index holds the whole table, so the run counts as a full load.
    assert!(outcome.checkpoint.is_some());
    assert_eq!(checkpoints.history(JOB).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unserializable_entities_are_skipped_with_skip_policy() {
    init_test_tracing();
    let mut rows = people(3);
    rows.push(PersonRow::corrupt("0100", base_time()));
    let source = MemoryChangeSource::with_rows(rows);
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let mut settings = settings();
    settings.pipeline.on_serialization_failure = SerializationFailurePolicy::Skip;
    let job = IndexerJob::new(
        JOB,
        source.clone(),
        PersonNormalizer,
        PersonMapper::new(),
        index.clone(),
        checkpoints.clone(),
        settings,
    );

    let (outcome, _) = run(&job, JobOptions::default()).await;

    assert_eq!(index.documents(INDEX).await.len(), 3);
    assert_eq!(outcome.records_processed, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn index_name_option_overrides_configured_index() {
    init_test_tracing();
    let source = MemoryChangeSource::with_rows(people(2));
    let index = MemoryIndex::new();
    let checkpoints = MemoryCheckpointStore::new();

    let options = JobOptions {
        index_name: Some("people_v2".to_string()),
        ..JobOptions::full()
    };
    run(&person_job(&source, &index, &checkpoints), options).await;

    assert_eq!(index.documents("people_v2").await.len(), 2);
    assert!(!index.index_exists(INDEX).await);
}
