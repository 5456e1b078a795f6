//! Metric names recorded through the `metrics` facade.

/// Label holding the job name.
pub const JOB_LABEL: &str = "job";

/// Label holding the run status of a finished job.
pub const STATUS_LABEL: &str = "status";

/// Label holding the index name.
pub const INDEX_LABEL: &str = "index";

// Pipeline metrics

/// Counter of rows read from change sources.
pub const INDEXER_ROWS_READ_TOTAL: &str = "indexer_rows_read_total";

/// Counter of entities produced by normalization.
pub const INDEXER_ENTITIES_NORMALIZED_TOTAL: &str = "indexer_entities_normalized_total";

/// Counter of index actions handed to the bulk writer.
pub const INDEXER_DOCUMENTS_PUBLISHED_TOTAL: &str = "indexer_documents_published_total";

/// Counter of entities skipped because they could not be mapped to documents.
pub const INDEXER_DOCUMENTS_SKIPPED_TOTAL: &str = "indexer_documents_skipped_total";

// Bulk writer metrics

pub const INDEXER_BULK_REQUESTS_TOTAL: &str = "indexer_bulk_requests_total";

/// Counter of actions that failed, whether rejected by the index or lost with their request.
pub const INDEXER_BULK_FAILED_ACTIONS_TOTAL: &str = "indexer_bulk_failed_actions_total";

/// Histogram of bulk request durations in seconds.
pub const INDEXER_BULK_REQUEST_DURATION_SECONDS: &str = "indexer_bulk_request_duration_seconds";

// Scheduling metrics

/// Counter of finished runs, labeled by status.
pub const INDEXER_JOB_RUNS_TOTAL: &str = "indexer_job_runs_total";

pub const INDEXER_JOB_VETOES_TOTAL: &str = "indexer_job_vetoes_total";

/// Gauge of the estimated seconds left in the running job.
pub const INDEXER_JOB_TIME_LEFT_SECONDS: &str = "indexer_job_time_left_seconds";

pub const INDEXER_CHECKPOINT_ADVANCES_TOTAL: &str = "indexer_checkpoint_advances_total";
