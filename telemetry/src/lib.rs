//! Tracing setup shared by the indexer binaries and test suites.

pub mod tracing;
