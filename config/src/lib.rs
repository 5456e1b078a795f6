//! Configuration for the indexer workspace.
//!
//! Holds the serde-backed configuration structures shared by the indexer library and the
//! runner binary, together with hierarchical loading from files and `APP_` environment
//! variables.

pub mod environment;
pub mod load;
pub mod shared;
