//! Concurrency primitives shared by the pipeline, the bucket workers and the scheduler.
//!
//! The [`shutdown`] module provides the cooperative interruption signal a scheduler sends to a
//! running job. Workers check it between units of work and at queue receive points, never in
//! the middle of a network call.

pub mod shutdown;
