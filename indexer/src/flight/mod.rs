//! Run records and remaining time estimates.

mod estimate;
mod record;
mod recorder;

pub use estimate::{TimeLeftEstimator, estimate_remaining};
pub use record::{FlightRecord, FlightRecordHandle, RunStatus};
pub use recorder::FlightRecorder;
