//! Data model shared by sources, normalizers, writers and jobs.

mod bucket;
mod change;

pub use bucket::*;
pub use change::*;
