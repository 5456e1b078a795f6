use std::time::Duration;

use config::shared::RetryPolicyConfig;

use crate::error::{ErrorKind, IndexerError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The run can be retried automatically after a delay.
    Timed,
    /// The run should only be retried after manual intervention.
    Manual,
    /// The run should not be retried.
    NoRetry,
}

/// Policy describing how an [`IndexerError`] should be handled by the scheduler.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds the [`ErrorHandlingPolicy`] of a failed run from its error.
pub fn build_error_handling_policy(error: &IndexerError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient source or index failures that are expected to recover on their own. Upserts
        // are keyed by id, so rerunning the whole job is safe.
        ErrorKind::SourceReadError
        | ErrorKind::SourceConnectionFailed
        | ErrorKind::BulkWriteError
        | ErrorKind::BulkWriteTimeout
        | ErrorKind::IndexRequestFailed => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        ErrorKind::UnknownJob => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Register the job before scheduling or running it."),
        ),
        ErrorKind::VetoedExecution => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Wait for the running execution of the job to finish."),
        ),
        ErrorKind::Interrupted => ErrorHandlingPolicy::new(RetryDirective::NoRetry, None),

        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Fix the indexer configuration or the run options."),
        ),
        ErrorKind::CheckpointError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Check the checkpoint directory, its permissions and the checkpoint file format."),
        ),
        ErrorKind::DocumentSerializationError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Fix the source record or switch the serialization failure policy to skip."),
        ),

        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithManualRetry => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Manually trigger retry after resolving the issue."),
        ),
        #[cfg(feature = "failpoints")]
        ErrorKind::WithTimedRetry => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Will automatically retry after the configured delay."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("There is no single prescribed solution for this error. Rerun the job once the cause is resolved."),
        ),
    }
}

/// What the scheduler does after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Record the failure and wait for an operator.
    #[default]
    Manual,
    /// Rerun the job after `delay` when its error is retryable, up to `max_attempts` runs.
    Reschedule { delay: Duration, max_attempts: u32 },
}

impl RetryPolicy {
    /// Returns the delay before the next attempt, or `None` when the run must not be retried.
    pub fn retry_delay(&self, error: &IndexerError, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Manual => None,
            RetryPolicy::Reschedule {
                delay,
                max_attempts,
            } => {
                let retryable =
                    build_error_handling_policy(error).retry_directive() == RetryDirective::Timed;

                (retryable && attempt < *max_attempts).then_some(*delay)
            }
        }
    }
}

impl From<RetryPolicyConfig> for RetryPolicy {
    fn from(config: RetryPolicyConfig) -> Self {
        match config {
            RetryPolicyConfig::Manual => RetryPolicy::Manual,
            RetryPolicyConfig::Reschedule {
                delay_ms,
                max_attempts,
            } => RetryPolicy::Reschedule {
                delay: Duration::from_millis(delay_ms),
                max_attempts,
            },
        }
    }
}
