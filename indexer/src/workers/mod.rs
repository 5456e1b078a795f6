//! Workers of an indexing run.
//!
//! The staged pipeline connects a reader, a normalizer and a publisher through bounded queues.
//! Full loads fan bucket reads out over a [`bucket::BucketWorkerPool`]. Every worker hands its
//! actions to the run's shared bulk writer.

pub mod base;
pub mod bucket;
pub mod normalizer;
pub mod publisher;
pub mod reader;
