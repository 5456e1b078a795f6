//! Batch orchestration for keeping a search index in sync with a relational database.
//!
//! Jobs read changed rows from a [`source::ChangeSource`], regroup them into entities with an
//! [`normalizer::EntityNormalizer`] and hand the resulting documents to a shared
//! [`index::writer::BulkIndexWriter`]. Incremental runs resume from a checkpoint kept in a
//! [`checkpoint::CheckpointStore`]; full loads split the driver table into id buckets processed
//! by a worker pool. The [`scheduler::JobScheduler`] runs jobs on recurring triggers without
//! letting two executions of one job overlap, and records every run as a
//! [`flight::FlightRecord`].

pub mod checkpoint;
pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod flight;
pub mod index;
pub mod job;
mod macros;
pub mod metrics;
pub mod normalizer;
pub mod partition;
pub mod pipeline;
pub mod reference;
pub mod scheduler;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
