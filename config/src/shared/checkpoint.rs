use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Location of the persisted per-job checkpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Directory holding one checkpoint file per job.
    pub directory: PathBuf,
}
