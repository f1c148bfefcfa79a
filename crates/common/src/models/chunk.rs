//! Chunk and embedding records

use serde::{Deserialize, Serialize};

use super::Metadata;

/// A token-bounded slice of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Decoded window text
    pub text: String,

    /// Id of the owning [`super::Document`]
    pub source_id: String,

    /// Position within the owning document, starting at 0
    pub chunk_index: usize,

    /// Tokens in this window, never above the configured chunk size
    pub token_count: usize,

    /// Token offset of the window start within the document
    pub token_offset: usize,
}

/// A chunk with its vector, ready for the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,

    /// Dimensionality is fixed by `model_id`
    pub vector: Vec<f32>,

    pub model_id: String,

    /// Document metadata carried into the index
    #[serde(default)]
    pub metadata: Metadata,
}

impl EmbeddingRecord {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}
