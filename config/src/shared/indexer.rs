use std::collections::HashSet;

use serde::Deserialize;

use crate::shared::{
    BulkConfig, CheckpointConfig, IndexConfig, JobScheduleConfig, PipelineConfig,
    SchedulerConfig, SourceConfig, ValidationError,
};

/// Top-level configuration of the indexer service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexerConfig {
    pub source: SourceConfig,
    pub index: IndexConfig,
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Recurring triggers registered at startup.
    #[serde(default)]
    pub jobs: Vec<JobScheduleConfig>,
}

impl IndexerConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.index.validate()?;
        self.pipeline.validate()?;
        self.bulk.validate()?;
        self.scheduler.validate()?;

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(ValidationError::DuplicateJob(job.name.clone()));
            }
        }

        Ok(())
    }
}
