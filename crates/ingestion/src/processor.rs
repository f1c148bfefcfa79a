//! Ingestion pipeline
//!
//! documents → chunks → embeddings → full-refresh collection write.
//! Any embedding or index failure aborts the run before or during the
//! write; there is no partial success.

use crate::chunker::Chunker;
use crate::errors::IngestionError;
use ragline_common::index::VectorIndexWriter;
use ragline_common::metrics;
use ragline_common::models::{Chunk, Document, EmbeddingRecord, Metadata};
use ragline_common::EmbeddingClient;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Outcome of one ingestion run
#[derive(Debug, Clone)]
pub struct IngestionSummary {
    pub documents: usize,
    pub chunks: usize,
    pub collection: String,
    pub elapsed: Duration,
}

/// Chunks, embeds and stores a set of documents
pub struct IngestionPipeline {
    chunker: Chunker,
    embeddings: EmbeddingClient,
    writer: VectorIndexWriter,
}

impl IngestionPipeline {
    pub fn new(chunker: Chunker, embeddings: EmbeddingClient, writer: VectorIndexWriter) -> Self {
        Self {
            chunker,
            embeddings,
            writer,
        }
    }

    /// Chunk every document, keeping each chunk's document metadata
    pub fn chunk_documents<'a>(&self, documents: &'a [Document]) -> Vec<(Chunk, &'a Metadata)> {
        documents
            .iter()
            .flat_map(|doc| {
                self.chunker
                    .chunk(&doc.text, &doc.id)
                    .into_iter()
                    .map(move |chunk| (chunk, &doc.metadata))
            })
            .collect()
    }

    /// Replace `collection` with the chunks of `documents`
    #[instrument(skip_all, fields(collection = %collection, documents = documents.len()))]
    pub async fn run(
        &self,
        documents: &[Document],
        collection: &str,
    ) -> Result<IngestionSummary, IngestionError> {
        let start = Instant::now();

        let chunked = self.chunk_documents(documents);
        if chunked.is_empty() {
            return Err(IngestionError::EmptyInput(format!(
                "{} documents produced no chunks",
                documents.len()
            )));
        }
        info!(chunks = chunked.len(), "Documents chunked");

        let texts: Vec<String> = chunked.iter().map(|(chunk, _)| chunk.text.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        info!(vectors = vectors.len(), model = self.embeddings.model(), "Chunks embedded");

        let ingested_at = chrono::Utc::now().to_rfc3339();
        let records: Vec<EmbeddingRecord> = chunked
            .into_iter()
            .zip(vectors)
            .map(|((chunk, doc_metadata), vector)| {
                let mut metadata = doc_metadata.clone();
                metadata.insert("chunk_idx".to_string(), Value::from(chunk.chunk_index));
                metadata.insert("ingested_at".to_string(), Value::String(ingested_at.clone()));

                EmbeddingRecord {
                    chunk,
                    vector,
                    model_id: self.embeddings.model().to_string(),
                    metadata,
                }
            })
            .collect();

        let written = self.writer.upsert_collection(collection, &records).await?;

        let elapsed = start.elapsed();
        metrics::record_ingestion(elapsed.as_secs_f64(), documents.len(), written, collection);

        Ok(IngestionSummary {
            documents: documents.len(),
            chunks: written,
            collection: collection.to_string(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragline_common::embeddings::{EmbeddingService, MockEmbeddingService};
    use ragline_common::errors::{AppError, Result as AppResult};
    use ragline_common::index::{InMemoryVectorStore, VectorStore};
    use ragline_common::tokenizer::CharTokenizer;
    use std::sync::Arc;

    struct DownService;

    #[async_trait]
    impl EmbeddingService for DownService {
        async fn embed(&self, _model: &str, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Err(AppError::transient("embeddings", "connection refused"))
        }

        fn provider(&self) -> &str {
            "down"
        }
    }

    fn pipeline(service: Arc<dyn EmbeddingService>, store: Arc<InMemoryVectorStore>) -> IngestionPipeline {
        let tokenizer = Arc::new(CharTokenizer);
        IngestionPipeline::new(
            Chunker::new(tokenizer.clone(), 512, 50).unwrap(),
            EmbeddingClient::new(service, tokenizer, "text-embedding-3-small", 100, 2, Duration::ZERO),
            VectorIndexWriter::new(store),
        )
    }

    fn document(text: String) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert("source_idx".to_string(), Value::from(0));
        metadata.insert("kommune".to_string(), Value::String("Trondheim".into()));
        Document::new("0", text, metadata)
    }

    #[tokio::test]
    async fn test_700_token_document_stored_as_two_chunks() {
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline(Arc::new(MockEmbeddingService::new(8)), store.clone());
        let text: String = ('a'..='z').cycle().take(700).collect();

        let summary = pipeline.run(&[document(text.clone())], "plans").await.unwrap();

        assert_eq!(summary.documents, 1);
        assert_eq!(summary.chunks, 2);

        let stored = store.records("plans").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].id, "doc_1");
        assert_eq!(stored[1].document, text[462..]);
        assert_eq!(stored[1].metadata["chunk_idx"], "1");
        assert_eq!(stored[1].metadata["chunk_index"], "1");
        assert_eq!(stored[1].metadata["source_idx"], "0");
        assert_eq!(stored[1].metadata["kommune"], "Trondheim");
        assert_eq!(stored[1].metadata["token_count"], "238");
        assert!(stored[1].metadata.contains_key("ingested_at"));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_collection_untouched() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("plans").await.unwrap();
        let pipeline = pipeline(Arc::new(DownService), store.clone());

        let err = pipeline
            .run(&[document("kort tekst".into())], "plans")
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::Service(AppError::TransientApi { .. })));
        assert_eq!(store.count("plans").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let pipeline = pipeline(
            Arc::new(MockEmbeddingService::new(8)),
            Arc::new(InMemoryVectorStore::new()),
        );

        let err = pipeline.run(&[document(String::new())], "plans").await.unwrap_err();
        assert!(matches!(err, IngestionError::EmptyInput(_)));
    }
}
