use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Bulk request settings of the index writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BulkConfig {
    /// Number of buffered actions that triggers an automatic flush.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    /// Maximum number of bulk requests in flight at the same time.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Maximum time, in milliseconds, that closing the writer waits for acknowledgements.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl BulkConfig {
    pub const DEFAULT_MAX_ACTIONS: usize = 1500;

    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

    pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 30_000;

    /// Validates bulk settings.
    ///
    /// Both the action threshold and the request concurrency must be non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_actions == 0 {
            return Err(ValidationError::invalid(
                "bulk.max_actions",
                "must be greater than 0",
            ));
        }

        if self.max_concurrent_requests == 0 {
            return Err(ValidationError::invalid(
                "bulk.max_concurrent_requests",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_actions: default_max_actions(),
            max_concurrent_requests: default_max_concurrent_requests(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

fn default_max_actions() -> usize {
    BulkConfig::DEFAULT_MAX_ACTIONS
}

fn default_max_concurrent_requests() -> usize {
    BulkConfig::DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_close_timeout_ms() -> u64 {
    BulkConfig::DEFAULT_CLOSE_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_actions_is_rejected() {
        let config = BulkConfig {
            max_actions: 0,
            ..BulkConfig::default()
        };

        assert!(config.validate().is_err());
        assert!(BulkConfig::default().validate().is_ok());
    }
}
