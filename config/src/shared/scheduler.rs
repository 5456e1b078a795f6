use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How the scheduler reacts to a failed run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetryPolicyConfig {
    /// Failed runs are recorded and wait for an operator to rerun them.
    #[default]
    Manual,
    /// Failed runs with a retryable error are rerun after `delay_ms`.
    Reschedule { delay_ms: u64, max_attempts: u32 },
}

/// Settings of the job scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
    /// Number of flight records kept per job.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Interval between reference data refreshes, in seconds.
    #[serde(default = "default_reference_refresh_secs")]
    pub reference_refresh_secs: u64,
}

impl SchedulerConfig {
    pub const DEFAULT_HISTORY_SIZE: usize = 100;

    /// Fifteen days.
    pub const DEFAULT_REFERENCE_REFRESH_SECS: u64 = 15 * 24 * 60 * 60;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.history_size == 0 {
            return Err(ValidationError::invalid(
                "scheduler.history_size",
                "must be greater than 0",
            ));
        }

        if let RetryPolicyConfig::Reschedule { max_attempts, .. } = self.retry_policy
            && max_attempts == 0
        {
            return Err(ValidationError::invalid(
                "scheduler.retry_policy.max_attempts",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicyConfig::default(),
            history_size: default_history_size(),
            reference_refresh_secs: default_reference_refresh_secs(),
        }
    }
}

/// Recurring trigger of one registered job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobScheduleConfig {
    pub name: String,
    /// Interval between two triggers, in seconds.
    pub interval_secs: u64,
    #[serde(default)]
    pub initial_delay_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl JobScheduleConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::invalid(
                "jobs.interval_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn default_history_size() -> usize {
    SchedulerConfig::DEFAULT_HISTORY_SIZE
}

fn default_reference_refresh_secs() -> u64 {
    SchedulerConfig::DEFAULT_REFERENCE_REFRESH_SECS
}

fn default_enabled() -> bool {
    true
}
