//! Shorthands for building and returning [`crate::error::IndexerError`] values.

/// Builds an [`crate::error::IndexerError`].
///
/// Takes a kind and a static description, then optionally a detail rendered with `to_string`
/// (a job name, an id range, a failed error) and a trailing `source:` error.
///
/// ```ignore
/// indexer_error!(ErrorKind::CheckpointError, "Checkpoint file unreadable", path.display(), source: err)
/// ```
#[macro_export]
macro_rules! indexer_error {
    ($kind:expr, $desc:expr $(,)?) => {
        $crate::error::IndexerError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr $(,)?) => {
        $crate::error::IndexerError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr $(,)?) => {
        $crate::indexer_error!($kind, $desc, $detail).with_source($source)
    };
}

/// Returns early with the error [`indexer_error!`] builds from the same arguments.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::indexer_error!($($args)+))
    };
}
