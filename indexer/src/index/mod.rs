//! Search index access: documents, clients and the bulk writer.

mod base;
pub mod document;
pub mod elasticsearch;
pub mod memory;
pub mod writer;

pub use base::{BulkResponse, IndexAction, IndexClient};
