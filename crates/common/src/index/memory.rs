//! Process-local vector store with exact cosine search

use super::{SearchHit, StoredRecord, VectorStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Collections held in memory; nothing survives a restart
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's records in insertion order
    pub fn records(&self, collection: &str) -> Option<Vec<StoredRecord>> {
        self.collections
            .read()
            .ok()
            .and_then(|guard| guard.get(collection).cloned())
    }

    fn poisoned() -> AppError {
        AppError::Internal {
            message: "In-memory index lock poisoned".to_string(),
        }
    }

    fn missing(collection: &str) -> AppError {
        AppError::VectorStore {
            message: format!("Collection {} does not exist", collection),
        }
    }
}

/// Cosine distance (`1 - cos`); zero vectors are maximally distant
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut guard = self.collections.write().map_err(|_| Self::poisoned())?;
        if guard.contains_key(name) {
            return Err(AppError::VectorStore {
                message: format!("Collection {} already exists", name),
            });
        }
        guard.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut guard = self.collections.write().map_err(|_| Self::poisoned())?;
        Ok(guard.remove(name).is_some())
    }

    async fn add(&self, collection: &str, records: &[StoredRecord]) -> Result<()> {
        let mut guard = self.collections.write().map_err(|_| Self::poisoned())?;
        let entries = guard.get_mut(collection).ok_or_else(|| Self::missing(collection))?;
        entries.extend_from_slice(records);
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let guard = self.collections.read().map_err(|_| Self::poisoned())?;
        let entries = guard.get(collection).ok_or_else(|| Self::missing(collection))?;

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|record| SearchHit {
                id: record.id.clone(),
                document: record.document.clone(),
                distance: Some(cosine_distance(embedding, &record.embedding)),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let guard = self.collections.read().map_err(|_| Self::poisoned())?;
        guard
            .get(collection)
            .map(Vec::len)
            .ok_or_else(|| Self::missing(collection))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
