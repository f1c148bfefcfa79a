//! Nearest-passage retrieval for a query

use crate::embeddings::EmbeddingClient;
use crate::errors::Result;
use crate::index::VectorIndexReader;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Placed between retrieved passages
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Embeds queries and looks up the closest indexed passages.
///
/// Read-only: never touches the index contents or conversation state.
#[derive(Clone)]
pub struct ContextRetriever {
    embeddings: Arc<EmbeddingClient>,
    reader: VectorIndexReader,
    collection: String,
    top_k: usize,
}

impl ContextRetriever {
    pub fn new(
        embeddings: Arc<EmbeddingClient>,
        reader: VectorIndexReader,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            embeddings,
            reader,
            collection: collection.into(),
            top_k,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn reader(&self) -> &VectorIndexReader {
        &self.reader
    }

    /// Up to `top_k` passages, closest first
    #[instrument(skip_all, fields(collection = %self.collection, top_k = self.top_k))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let start = Instant::now();

        let vector = self.embeddings.embed_query(query).await?;
        let passages = self.reader.query(&self.collection, &vector, self.top_k).await?;

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_retrieval(elapsed, &self.collection, passages.len());
        debug!(
            collection = %self.collection,
            passages = passages.len(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Retrieved context"
        );

        Ok(passages)
    }

    /// Retrieved passages joined by [`CONTEXT_SEPARATOR`]
    pub async fn get_relevant_context(&self, query: &str) -> Result<String> {
        let passages = self.retrieve(query).await?;
        Ok(passages.join(CONTEXT_SEPARATOR))
    }
}
