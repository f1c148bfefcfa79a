//! Vector index access
//!
//! Provides:
//! - [`VectorStore`]: the similarity search service seam
//! - [`VectorIndexWriter`]: full-refresh collection upserts
//! - [`VectorIndexReader`]: top-k nearest neighbour lookups

mod chroma;
mod memory;

pub use chroma::ChromaStore;
pub use memory::InMemoryVectorStore;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::EmbeddingRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// String-only metadata as persisted by the store
pub type StoredMetadata = BTreeMap<String, String>;

/// Records per add request
const WRITE_BATCH_SIZE: usize = 500;

/// One entry as persisted in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: StoredMetadata,
}

/// A ranked neighbour returned by a query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    /// Store-defined distance, smaller is closer
    pub distance: Option<f32>,
}

/// Vector similarity search service
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create an empty collection
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Delete a collection; returns whether it existed
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Append records to an existing collection
    async fn add(&self, collection: &str, records: &[StoredRecord]) -> Result<()>;

    /// Nearest neighbours of `embedding`, closest first, at most `top_k`
    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Number of records in a collection
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<()>;

    /// Backend name for logs
    fn backend(&self) -> &str;
}

/// Create a vector store based on configuration
pub fn create_vector_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    match config.index.backend.as_str() {
        "chroma" => Ok(Arc::new(ChromaStore::new(
            config.index.url.clone(),
            config.index.tenant.clone(),
            config.index.database.clone(),
            config.request_timeout(),
        )?)),
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        other => Err(AppError::config(format!("Unknown index backend: {}", other))),
    }
}

/// Render a metadata value the way it is stored
pub fn coerce_metadata_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Writes embedding records into a collection, replacing its contents
pub struct VectorIndexWriter {
    store: Arc<dyn VectorStore>,
}

impl VectorIndexWriter {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Replace collection `name` with `records`.
    ///
    /// Records get ids `doc_0 .. doc_{n-1}` in input order. Returns the
    /// number of stored records.
    pub async fn upsert_collection(&self, name: &str, records: &[EmbeddingRecord]) -> Result<usize> {
        let start = Instant::now();

        if let Some(first) = records.first() {
            let dimension = first.dimension();
            if let Some(bad) = records.iter().find(|r| r.dimension() != dimension) {
                return Err(AppError::VectorStore {
                    message: format!(
                        "Mixed vector dimensions in one collection: {} and {}",
                        dimension,
                        bad.dimension()
                    ),
                });
            }
        }

        if self.store.delete_collection(name).await? {
            info!(collection = name, "Deleted existing collection");
        }
        self.store.create_collection(name).await?;

        let stored: Vec<StoredRecord> = records
            .iter()
            .enumerate()
            .map(|(i, record)| Self::to_stored(i, record))
            .collect();

        for (batch_no, batch) in stored.chunks(WRITE_BATCH_SIZE).enumerate() {
            debug!(collection = name, batch = batch_no, size = batch.len(), "Adding records");
            self.store.add(name, batch).await?;
        }

        info!(
            collection = name,
            records = stored.len(),
            backend = self.store.backend(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Collection written"
        );

        Ok(stored.len())
    }

    fn to_stored(position: usize, record: &EmbeddingRecord) -> StoredRecord {
        let mut metadata: StoredMetadata = record
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), coerce_metadata_value(value)))
            .collect();

        metadata.insert("chunk_index".to_string(), position.to_string());
        metadata.insert("document_type".to_string(), "text".to_string());
        metadata.insert("token_count".to_string(), record.chunk.token_count.to_string());
        metadata.insert("embedding_model".to_string(), record.model_id.clone());

        StoredRecord {
            id: format!("doc_{}", position),
            document: record.chunk.text.clone(),
            embedding: record.vector.clone(),
            metadata,
        }
    }
}

/// Nearest neighbour lookups against a collection
#[derive(Clone)]
pub struct VectorIndexReader {
    store: Arc<dyn VectorStore>,
}

impl VectorIndexReader {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Document texts of the `top_k` closest records, closest first.
    ///
    /// Collections smaller than `top_k` return everything they hold.
    pub async fn query(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<String>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.store.query(collection, vector, top_k).await?;
        hits.truncate(top_k);

        debug!(
            collection,
            requested = top_k,
            returned = hits.len(),
            closest = ?hits.first().and_then(|h| h.distance),
            "Index query"
        );

        Ok(hits.into_iter().map(|hit| hit.document).collect())
    }

    /// Check that the collection is reachable and report its size
    pub async fn probe(&self, collection: &str, timeout: Duration) -> Result<usize> {
        tokio::time::timeout(timeout, async {
            self.store.health_check().await?;
            self.store.count(collection).await
        })
        .await
        .map_err(|_| AppError::VectorStore {
            message: format!("Index probe timed out after {:?}", timeout),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};
    use serde_json::json;

    fn record(text: &str, vector: Vec<f32>, metadata: Metadata) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: Chunk {
                text: text.to_string(),
                source_id: "0".to_string(),
                chunk_index: 0,
                token_count: text.len(),
                token_offset: 0,
            },
            vector,
            model_id: "text-embedding-3-small".to_string(),
            metadata,
        }
    }

    /// Ten records along distinct axes of a 10-dimensional space
    fn axis_records() -> Vec<EmbeddingRecord> {
        (0..10)
            .map(|i| {
                let mut v = vec![0.0; 10];
                v[i] = 1.0;
                record(&format!("passage {}", i), v, Metadata::new())
            })
            .collect()
    }

    #[test]
    fn test_metadata_coercion() {
        assert_eq!(coerce_metadata_value(&json!("Oslo")), "Oslo");
        assert_eq!(coerce_metadata_value(&json!(42)), "42");
        assert_eq!(coerce_metadata_value(&json!(2.5)), "2.5");
        assert_eq!(coerce_metadata_value(&json!(true)), "true");
        assert_eq!(coerce_metadata_value(&json!(null)), "");
    }

    #[tokio::test]
    async fn test_writer_assigns_sequential_ids_and_string_metadata() {
        let store = Arc::new(InMemoryVectorStore::new());
        let writer = VectorIndexWriter::new(store.clone());

        let mut metadata = Metadata::new();
        metadata.insert("source_idx".to_string(), json!(7));
        metadata.insert("kommune".to_string(), json!("Bergen"));
        let records = vec![
            record("first", vec![1.0, 0.0], metadata.clone()),
            record("second", vec![0.0, 1.0], metadata),
        ];

        let written = writer.upsert_collection("plans", &records).await.unwrap();
        assert_eq!(written, 2);

        let stored = store.records("plans").unwrap();
        assert_eq!(stored[0].id, "doc_0");
        assert_eq!(stored[1].id, "doc_1");
        assert_eq!(stored[1].metadata["chunk_index"], "1");
        assert_eq!(stored[1].metadata["source_idx"], "7");
        assert_eq!(stored[1].metadata["kommune"], "Bergen");
        assert_eq!(stored[1].metadata["document_type"], "text");
        assert_eq!(stored[1].metadata["embedding_model"], "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_writer_replaces_existing_collection() {
        let store = Arc::new(InMemoryVectorStore::new());
        let writer = VectorIndexWriter::new(store.clone());

        writer.upsert_collection("plans", &axis_records()).await.unwrap();
        writer
            .upsert_collection("plans", &[record("only", vec![1.0; 10], Metadata::new())])
            .await
            .unwrap();

        assert_eq!(store.count("plans").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writer_rejects_mixed_dimensions() {
        let writer = VectorIndexWriter::new(Arc::new(InMemoryVectorStore::new()));
        let records = vec![
            record("a", vec![1.0, 0.0], Metadata::new()),
            record("b", vec![1.0, 0.0, 0.0], Metadata::new()),
        ];

        let err = writer.upsert_collection("plans", &records).await.unwrap_err();
        assert!(matches!(err, AppError::VectorStore { .. }));
    }

    #[tokio::test]
    async fn test_reader_returns_top_k_closest_first() {
        let store = Arc::new(InMemoryVectorStore::new());
        VectorIndexWriter::new(store.clone())
            .upsert_collection("plans", &axis_records())
            .await
            .unwrap();
        let reader = VectorIndexReader::new(store);

        let mut query = vec![0.0; 10];
        query[3] = 1.0;
        query[5] = 0.5;
        let docs = reader.query("plans", &query, 4).await.unwrap();

        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0], "passage 3");
        assert_eq!(docs[1], "passage 5");
    }

    #[tokio::test]
    async fn test_reader_under_populated_collection() {
        let store = Arc::new(InMemoryVectorStore::new());
        VectorIndexWriter::new(store.clone())
            .upsert_collection("plans", &axis_records()[..2])
            .await
            .unwrap();
        let reader = VectorIndexReader::new(store);

        let docs = reader.query("plans", &[1.0; 10], 4).await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_probe_reports_size() {
        let store = Arc::new(InMemoryVectorStore::new());
        VectorIndexWriter::new(store.clone())
            .upsert_collection("plans", &axis_records())
            .await
            .unwrap();
        let reader = VectorIndexReader::new(store);

        let size = reader.probe("plans", Duration::from_secs(1)).await.unwrap();
        assert_eq!(size, 10);
    }
}
