//! Embedding service abstraction
//!
//! Provides:
//! - [`EmbeddingService`]: one request against a remote embeddings endpoint
//!   (OpenAI, or a deterministic mock for offline runs)
//! - [`EmbeddingClient`]: batching and bounded retry with linear backoff on
//!   top of a service

mod backoff_policy;

pub use backoff_policy::LinearBackoff;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Input limit of the OpenAI embedding models, in tokens
pub const MAX_INPUT_TOKENS: usize = 8191;

/// Trait for a single embeddings request
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed `texts` with `model`; output has the same length and order
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Provider name for logs and metrics
    fn provider(&self) -> &str;
}

/// OpenAI embeddings endpoint
pub struct OpenAiEmbeddingService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingService {
    /// Create a new OpenAI embeddings service
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Decode an embeddings response body, restoring input order
fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut parsed: OpenAiResponse = serde_json::from_str(body)
        .map_err(|e| AppError::parse(format!("Failed to parse embeddings response: {}", e)))?;

    if parsed.data.len() != expected {
        return Err(AppError::parse(format!(
            "Embeddings response has {} vectors for {} inputs",
            parsed.data.len(),
            expected
        )));
    }

    parsed.data.sort_by_key(|e| e.index);
    Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiRequest { input: texts, model })
            .send()
            .await
            .map_err(|e| AppError::transient("embeddings", format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::transient("embeddings", format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::transient(
                "embeddings",
                format!("API error {}: {}", status, body),
            ));
        }

        parse_embeddings(&body, texts.len())
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

/// Deterministic embeddings derived from a hash of the text.
///
/// Identical texts map to identical vectors, so retrieval over a mock index
/// is reproducible.
pub struct MockEmbeddingService {
    dimension: usize,
}

impl MockEmbeddingService {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut block = 0u32;
        while vector.len() < self.dimension {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            for byte in digest.iter() {
                if vector.len() == self.dimension {
                    break;
                }
                vector.push(*byte as f32 / 255.0 - 0.5);
            }
            block += 1;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Create an embedding service based on configuration
pub fn create_embedding_service(config: &AppConfig) -> Result<Arc<dyn EmbeddingService>> {
    match config.embedding.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbeddingService::new(
            config.openai.api_key.clone(),
            config.openai.api_base.clone(),
            config.request_timeout(),
        )?)),
        "mock" => Ok(Arc::new(MockEmbeddingService::new(256))),
        other => Err(AppError::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Batching, retrying embeddings client
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    tokenizer: Arc<dyn Tokenizer>,
    model: String,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl EmbeddingClient {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        tokenizer: Arc<dyn Tokenizer>,
        model: impl Into<String>,
        batch_size: usize,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            service,
            tokenizer,
            model: model.into(),
            batch_size: batch_size.max(1),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Build a client from the embedding section of the configuration
    pub fn from_config(
        config: &AppConfig,
        service: Arc<dyn EmbeddingService>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self::new(
            service,
            tokenizer,
            config.embedding.model.clone(),
            config.embedding.batch_size,
            config.embedding.max_retries,
            config.retry_delay(),
        )
    }

    /// Model id stamped on every produced vector
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed all texts, batch by batch.
    ///
    /// All-or-nothing: the first batch that exhausts its attempts aborts
    /// the call and nothing is returned.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let tokens: usize = batch
                .iter()
                .map(|text| {
                    let count = self.tokenizer.count(text);
                    if count > MAX_INPUT_TOKENS {
                        warn!(
                            tokens = count,
                            limit = MAX_INPUT_TOKENS,
                            "Text exceeds embedding model input limit"
                        );
                    }
                    count
                })
                .sum();

            debug!(
                batch = batch_no,
                size = batch.len(),
                tokens,
                model = %self.model,
                "Embedding batch"
            );

            let vectors = self.embed_with_retry(batch).await?;
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    /// Embed a single query text
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::parse("Empty embeddings response"))
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = LinearBackoff::new(self.retry_delay, self.max_retries);
        let mut attempt = 0u32;

        let operation = move || async move {
            let start = Instant::now();
            let result = self.service.embed(&self.model, batch).await;
            let elapsed = start.elapsed().as_secs_f64();
            metrics::record_embedding(elapsed, &self.model, batch.len(), result.is_ok());

            result.map_err(|e| {
                if e.is_transient() {
                    ::backoff::Error::transient(e)
                } else {
                    ::backoff::Error::permanent(e)
                }
            })
        };

        let notify = |e: AppError, delay: Duration| {
            attempt += 1;
            metrics::record_embedding_retry(&self.model);
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Embedding request failed, retrying"
            );
        };

        ::backoff::future::retry_notify(policy, operation, notify)
            .await
            .map_err(|e| {
                error!(
                    max_retries = self.max_retries,
                    error = %e,
                    "Failed to get embeddings after retries"
                );
                match e {
                    AppError::TransientApi { .. } => e,
                    other if other.is_transient() => AppError::transient(
                        "embeddings",
                        format!("Gave up after {} attempts: {}", self.max_retries, other),
                    ),
                    other => other,
                }
            })
    }
}
