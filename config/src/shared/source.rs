use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection and query settings of the relational change source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    /// Password of `username`, redacted in debug output.
    pub password: Option<SecretString>,
    /// Table or view scanned to allocate full-load buckets.
    pub driver_table: String,
    /// Size of the connection pool shared by one run's workers.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl SourceConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.driver_table.trim().is_empty() {
            return Err(ValidationError::invalid(
                "source.driver_table",
                "must not be empty",
            ));
        }

        if self.max_connections == 0 {
            return Err(ValidationError::invalid(
                "source.max_connections",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn default_max_connections() -> u32 {
    SourceConfig::DEFAULT_MAX_CONNECTIONS
}
