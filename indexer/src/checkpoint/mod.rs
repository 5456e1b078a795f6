//! Persistence of the last successful run time of each job.

mod base;
pub mod file;
pub mod memory;

pub use base::{Checkpoint, CheckpointStore, NEVER_RUN_YEARS};
