//! Regrouping of denormalized rows into entities.

mod base;
mod grouping;

pub use base::{EntityNormalizer, PassThroughNormalizer};
pub use grouping::{GroupReducer, reduce_all};
