use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// What the publisher does with an entity that cannot be turned into a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFailurePolicy {
    /// Log the entity, count it as skipped and keep going.
    #[default]
    Skip,
    /// Fail the run.
    Abort,
}

/// Settings of the staged reader, normalizer and publisher pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Capacity of the queue between the reader and the normalizer.
    #[serde(default = "default_reader_queue_capacity")]
    pub reader_queue_capacity: usize,
    /// Capacity of the queue between the normalizer and the publisher.
    #[serde(default = "default_normalizer_queue_capacity")]
    pub normalizer_queue_capacity: usize,
    /// Number of buckets processed concurrently during full loads.
    #[serde(default = "default_bucket_workers")]
    pub bucket_workers: usize,
    /// Default number of buckets a full load is split into.
    #[serde(default = "default_total_buckets")]
    pub total_buckets: u32,
    #[serde(default)]
    pub on_serialization_failure: SerializationFailurePolicy,
    /// Emit a progress log line every this many rows.
    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

impl PipelineConfig {
    pub const DEFAULT_READER_QUEUE_CAPACITY: usize = 150_000;

    pub const DEFAULT_NORMALIZER_QUEUE_CAPACITY: usize = 50_000;

    pub const DEFAULT_BUCKET_WORKERS: usize = 4;

    pub const DEFAULT_TOTAL_BUCKETS: u32 = 8;

    pub const DEFAULT_LOG_EVERY: u64 = 5000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reader_queue_capacity == 0 {
            return Err(ValidationError::invalid(
                "pipeline.reader_queue_capacity",
                "must be greater than 0",
            ));
        }

        if self.normalizer_queue_capacity == 0 {
            return Err(ValidationError::invalid(
                "pipeline.normalizer_queue_capacity",
                "must be greater than 0",
            ));
        }

        if self.bucket_workers == 0 {
            return Err(ValidationError::invalid(
                "pipeline.bucket_workers",
                "must be greater than 0",
            ));
        }

        if self.total_buckets == 0 {
            return Err(ValidationError::invalid(
                "pipeline.total_buckets",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reader_queue_capacity: default_reader_queue_capacity(),
            normalizer_queue_capacity: default_normalizer_queue_capacity(),
            bucket_workers: default_bucket_workers(),
            total_buckets: default_total_buckets(),
            on_serialization_failure: SerializationFailurePolicy::default(),
            log_every: default_log_every(),
        }
    }
}

fn default_reader_queue_capacity() -> usize {
    PipelineConfig::DEFAULT_READER_QUEUE_CAPACITY
}

fn default_normalizer_queue_capacity() -> usize {
    PipelineConfig::DEFAULT_NORMALIZER_QUEUE_CAPACITY
}

fn default_bucket_workers() -> usize {
    PipelineConfig::DEFAULT_BUCKET_WORKERS
}

fn default_total_buckets() -> u32 {
    PipelineConfig::DEFAULT_TOTAL_BUCKETS
}

fn default_log_every() -> u64 {
    PipelineConfig::DEFAULT_LOG_EVERY
}
