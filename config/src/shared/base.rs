use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted domain.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Two job schedules share the same job name.
    #[error("job `{0}` is scheduled more than once")]
    DuplicateJob(String),
    /// The bucket range of a run is inverted or out of bounds.
    #[error("invalid bucket range {start}..={end} for {total} total buckets")]
    InvalidBucketRange { start: u32, end: u32, total: u32 },
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, constraint: &str) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: constraint.to_string(),
        }
    }
}
