//! Fixtures shared by unit and integration tests.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod index;
pub mod job;
pub mod person;
