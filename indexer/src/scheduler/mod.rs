//! Job scheduling with non-overlapping executions.

mod base;
pub mod policy;
pub mod registry;

pub use base::{JobHandle, JobScheduler, TriggerSpec};
pub use policy::{RetryPolicy, build_error_handling_policy};
