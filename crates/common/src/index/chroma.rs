//! Chroma REST client (API v2, Chroma 1.x servers)
//!
//! Collections live under `/api/v2/tenants/{tenant}/databases/{database}`.
//! They are addressed by name in configuration but by id in the record
//! endpoints; ids are resolved once and cached until the collection is
//! deleted.

use super::{SearchHit, StoredMetadata, StoredRecord, VectorStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Vector store backed by a Chroma server
pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
    collection_ids: RwLock<HashMap<String, String>>,
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    metadata: HashMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a StoredMetadata>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 2],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    documents: Option<Vec<Vec<Option<String>>>>,
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaStore {
    /// Create a client for `tenant`/`database` on the Chroma server at `base_url`
    pub fn new(base_url: String, tenant: String, database: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant,
            database,
            collection_ids: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.base_url, path)
    }

    /// Collection endpoints of the configured tenant and database
    fn collections_url(&self, path: &str) -> String {
        self.url(&format!(
            "/tenants/{}/databases/{}/collections{}",
            self.tenant, self.database, path
        ))
    }

    fn store_error(context: &str, e: impl std::fmt::Display) -> AppError {
        AppError::VectorStore {
            message: format!("{}: {}", context, e),
        }
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::store_error(context, format!("{} {}", status, body)))
    }

    async fn collection_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.collection_ids.read().await.get(name) {
            return Ok(id.clone());
        }

        let response = self
            .client
            .get(self.collections_url(&format!("/{}", name)))
            .send()
            .await
            .map_err(|e| Self::store_error("Failed to look up collection", e))?;
        let response = Self::check(response, "Failed to look up collection").await?;
        let collection: CollectionResponse = response
            .json()
            .await
            .map_err(|e| Self::store_error("Malformed collection response", e))?;

        self.collection_ids
            .write()
            .await
            .insert(name.to_string(), collection.id.clone());
        Ok(collection.id)
    }
}

/// Flatten the single-query result lists into ranked hits
fn hits_from_response(response: QueryResponse) -> Vec<SearchHit> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let documents = response
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let distances = response
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| SearchHit {
            id,
            document: documents.get(i).cloned().flatten().unwrap_or_default(),
            distance: distances.get(i).copied().flatten(),
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let request = CreateCollectionRequest {
            name,
            metadata: HashMap::from([("hnsw:space", "cosine")]),
        };

        let response = self
            .client
            .post(self.collections_url(""))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::store_error("Failed to create collection", e))?;
        let response = Self::check(response, "Failed to create collection").await?;
        let collection: CollectionResponse = response
            .json()
            .await
            .map_err(|e| Self::store_error("Malformed collection response", e))?;

        debug!(collection = name, id = %collection.id, "Created collection");
        self.collection_ids
            .write()
            .await
            .insert(name.to_string(), collection.id);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.collection_ids.write().await.remove(name);

        let response = self
            .client
            .delete(self.collections_url(&format!("/{}", name)))
            .send()
            .await
            .map_err(|e| Self::store_error("Failed to delete collection", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("does not exist") {
            return Ok(false);
        }
        Err(Self::store_error(
            "Failed to delete collection",
            format!("{} {}", status, body),
        ))
    }

    async fn add(&self, collection: &str, records: &[StoredRecord]) -> Result<()> {
        let id = self.collection_id(collection).await?;
        let request = AddRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };

        let response = self
            .client
            .post(self.collections_url(&format!("/{}/add", id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::store_error("Failed to add records", e))?;
        Self::check(response, "Failed to add records").await?;
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let id = self.collection_id(collection).await?;
        let request = QueryRequest {
            query_embeddings: [embedding],
            n_results: top_k,
            include: ["documents", "distances"],
        };

        let response = self
            .client
            .post(self.collections_url(&format!("/{}/query", id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::store_error("Query failed", e))?;
        let response = Self::check(response, "Query failed").await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::parse(format!("Malformed query response: {}", e)))?;

        Ok(hits_from_response(parsed))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let id = self.collection_id(collection).await?;
        let response = self
            .client
            .get(self.collections_url(&format!("/{}/count", id)))
            .send()
            .await
            .map_err(|e| Self::store_error("Count failed", e))?;
        let response = Self::check(response, "Count failed").await?;
        response
            .json::<usize>()
            .await
            .map_err(|e| AppError::parse(format!("Malformed count response: {}", e)))
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/heartbeat"))
            .send()
            .await
            .map_err(|e| Self::store_error("Heartbeat failed", e))?;
        Self::check(response, "Heartbeat failed").await?;
        Ok(())
    }

    fn backend(&self) -> &str {
        "chroma"
    }
}
