//! Jobs run by the scheduler.

mod base;
pub mod indexer;
pub mod progress;
pub mod save_point;
pub mod tracker;

pub use base::{Job, JobContext, JobOutcome};
pub use indexer::{IndexerJob, IndexerJobSettings};
pub use save_point::{SavePointJob, SavePointSettings};
