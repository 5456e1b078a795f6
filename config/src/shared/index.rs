use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Search index endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexConfig {
    /// Base url of the search cluster, for example `http://localhost:9200`.
    pub url: String,
    /// Index written to unless a run overrides it.
    pub index_name: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Timeout of a single request to the cluster, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Settings and mappings body used when the index has to be created.
    #[serde(default)]
    pub index_settings: Option<serde_json::Value>,
}

impl IndexConfig {
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.index_name.trim().is_empty() {
            return Err(ValidationError::invalid(
                "index.index_name",
                "must not be empty",
            ));
        }

        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ValidationError::invalid(
                "index.url",
                "must be an http or https url",
            ));
        }

        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    IndexConfig::DEFAULT_REQUEST_TIMEOUT_MS
}
