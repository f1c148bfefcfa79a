//! Ingestion data model
//!
//! Records that flow from raw source rows to stored vectors:
//! [`Document`] → [`Chunk`] → [`EmbeddingRecord`].

mod chunk;
mod document;

pub use chunk::{Chunk, EmbeddingRecord};
pub use document::{Document, Metadata};
