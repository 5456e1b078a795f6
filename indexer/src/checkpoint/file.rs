use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{ErrorKind, IndexerResult};
use crate::indexer_error;

/// Text format of stored checkpoints, always in UTC.
const CHECKPOINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const CHECKPOINT_EXTENSION: &str = "time";

/// Checkpoint store keeping one text file per job in a directory.
///
/// Files hold a single timestamp in [`CHECKPOINT_FORMAT`]. Updates are written to a temporary
/// file, synced and renamed over the previous file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: Arc<PathBuf>,
    // Serializes read-modify-write cycles of `advance`.
    write_lock: Arc<Mutex<()>>,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Arc::new(directory.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn checkpoint_path(&self, job: &str) -> PathBuf {
        self.directory.join(format!("{job}.{CHECKPOINT_EXTENSION}"))
    }

    async fn read_stored(&self, job: &str) -> IndexerResult<Option<Checkpoint>> {
        let path = self.checkpoint_path(job);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let time = NaiveDateTime::parse_from_str(contents.trim(), CHECKPOINT_FORMAT).map_err(
            |err| {
                indexer_error!(
                    ErrorKind::CheckpointError,
                    "Stored checkpoint is not a valid timestamp",
                    format!("{}: {err}", path.display()),
                    source: err
                )
            },
        )?;

        Ok(Some(Checkpoint::new(time.and_utc())))
    }

    async fn write(&self, job: &str, time: DateTime<Utc>) -> IndexerResult<()> {
        fs::create_dir_all(self.directory.as_path()).await?;

        let path = self.checkpoint_path(job);
        let temp_path = path.with_extension(format!("{CHECKPOINT_EXTENSION}.tmp"));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(time.format(CHECKPOINT_FORMAT).to_string().as_bytes())
            .await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        // Makes the rename itself durable.
        fs::File::open(self.directory.as_path())
            .await?
            .sync_all()
            .await?;

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn read(&self, job: &str) -> IndexerResult<Checkpoint> {
        match self.read_stored(job).await? {
            Some(checkpoint) => Ok(checkpoint),
            None => {
                debug!(job, "no stored checkpoint, job never ran");
                Ok(Checkpoint::never_run(Utc::now()))
            }
        }
    }

    async fn advance(&self, job: &str, to: DateTime<Utc>) -> IndexerResult<Checkpoint> {
        let _guard = self.write_lock.lock().await;

        if let Some(current) = self.read_stored(job).await?
            && current.last_successful_run_time() >= to
        {
            debug!(job, %current, requested = %to, "checkpoint already past requested time");
            return Ok(current);
        }

        self.write(job, to).await?;
        info!(job, checkpoint = %to, "advanced checkpoint");

        Ok(Checkpoint::new(to))
    }
}
