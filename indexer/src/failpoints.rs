use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};

/// Raised right before a checkpoint is advanced.
pub const BEFORE_CHECKPOINT_ADVANCE: &str = "checkpoint.before_advance";

/// Raised right before a bulk request is sent.
pub const BEFORE_BULK_REQUEST: &str = "bulk_writer.before_request";

/// Raised right before a save-point batch loads its rows.
pub const BEFORE_BATCH_LOAD: &str = "save_point.before_batch_load";

/// Returns an error when the failpoint `name` is configured to fail.
///
/// The failpoint parameter selects the retry behavior of the returned error: `no_retry`,
/// `manual_retry` or `timed_retry`.
pub fn indexer_fail_point(name: &str) -> IndexerResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("manual_retry") => ErrorKind::WithManualRetry,
            Some("timed_retry") => ErrorKind::WithTimedRetry,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
