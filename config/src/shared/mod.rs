mod base;
mod bulk;
mod checkpoint;
mod index;
mod indexer;
mod options;
mod pipeline;
mod scheduler;
mod source;

pub use base::*;
pub use bulk::*;
pub use checkpoint::*;
pub use index::*;
pub use indexer::*;
pub use options::*;
pub use pipeline::*;
pub use scheduler::*;
pub use source::*;
