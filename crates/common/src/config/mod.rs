//! Configuration management for Ragline services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Loading is followed by [`AppConfig::validate`]; any failure is fatal at
//! startup, before a request is served or an ingestion run begins.

use crate::errors::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Model service credentials and endpoint
    pub openai: OpenAiConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Completion / assistant model configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Vector index configuration
    pub index: IndexConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Stateful assistant configuration
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Prompt template
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Header carrying the conversation session id
    #[serde(default = "default_session_header")]
    pub session_header: String,

    /// Idle time after which a conversation session is dropped
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Maximum accepted query length in characters
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    /// API key (required)
    pub api_key: String,

    /// API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Number of texts submitted per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Total attempts per batch
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds, multiplied by the attempt number
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Which conversation protocol answers `/chat`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatProtocol {
    /// One-shot streamed chat completion per query
    Stateless,
    /// Persistent thread driven through run polling
    Assistant,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Model used for completions and the assistant
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Conversation protocol
    #[serde(default = "default_protocol")]
    pub protocol: ChatProtocol,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Index backend: chroma, memory
    #[serde(default = "default_index_backend")]
    pub backend: String,

    /// Base URL of the vector similarity search service
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Chroma tenant
    #[serde(default = "default_index_tenant")]
    pub tenant: String,

    /// Chroma database within the tenant
    #[serde(default = "default_index_database")]
    pub database: String,

    /// Collection holding the ingested chunks (required)
    pub collection_name: String,

    /// Number of neighbours used as context
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Window width in tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tokens shared by consecutive windows
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantConfig {
    /// Display name of the assistant definition
    #[serde(default = "default_assistant_name")]
    pub name: String,

    /// Delay between run status polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single run in seconds (0 = unbounded)
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// Domain-expert persona / system directive
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Allowed structural markers and how to use them
    #[serde(default = "default_formatting_rules")]
    pub formatting_rules: Vec<String>,

    /// Additional answering guidance
    #[serde(default = "default_guidance")]
    pub guidance: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_session_header() -> String { "X-Session-ID".to_string() }
fn default_session_ttl() -> u64 { 1800 }
fn default_max_query_chars() -> usize { 4000 }
fn default_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_openai_timeout() -> u64 { 60 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_batch_size() -> usize { 100 }
fn default_embedding_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 1000 }
fn default_completion_model() -> String { crate::DEFAULT_COMPLETION_MODEL.to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 2000 }
fn default_protocol() -> ChatProtocol { ChatProtocol::Assistant }
fn default_index_backend() -> String { "chroma".to_string() }
fn default_index_url() -> String { "http://localhost:8000".to_string() }
fn default_index_tenant() -> String { "default_tenant".to_string() }
fn default_index_database() -> String { "default_database".to_string() }
fn default_top_k() -> usize { 4 }
fn default_chunk_size() -> usize { 512 }
fn default_chunk_overlap() -> usize { 50 }
fn default_assistant_name() -> String { "Health Sector Digitalization Expert".to_string() }
fn default_poll_interval() -> u64 { 500 }
fn default_max_wait() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

fn default_persona() -> String {
    "You are an expert on digitalization in the Norwegian health and care sector. \
     Your task is to guide users on the requirements and recommendations that apply to \
     digitalization in the health and care sector in Norway. Base your answers primarily \
     on the context you are given."
        .to_string()
}

fn default_formatting_rules() -> Vec<String> {
    [
        "<h1> for the main heading",
        "<h2> for subheadings",
        "<p> for paragraphs",
        "<ul> and <li> for bullet lists",
        "<ol> and <li> for numbered lists",
        "<a href=\"url\"> for links",
        "<strong> for emphasis",
        "<br> for line breaks where needed",
    ]
    .iter()
    .map(|rule| rule.to_string())
    .collect()
}

fn default_guidance() -> Vec<String> {
    [
        "Give answers that are as complete as possible; mention laws, regulations and interpretations.",
        "When listing code systems, standards or other requirements, check the context systematically and list every relevant element.",
        "Group related elements logically and explain relations between them.",
        "Do not wrap the answer in a code fence and always use complete tags.",
    ]
    .iter()
    .map(|rule| rule.to_string())
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_header: default_session_header(),
            session_ttl_secs: default_session_ttl(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            protocol: default_protocol(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            poll_interval_ms: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            formatting_rules: default_formatting_rules(),
            guidance: default_guidance(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files, then validate it
    pub fn load() -> Result<Self> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__INDEX__COLLECTION_NAME=reguleringsplan
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.openai.api_key.trim().is_empty() && self.embedding.provider != "mock" {
            return Err(AppError::config("openai.api_key is required"));
        }
        if self.index.collection_name.trim().is_empty() {
            return Err(AppError::config("index.collection_name is required"));
        }
        if self.chunking.chunk_size == 0 {
            return Err(AppError::config("chunking.chunk_size must be greater than 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(AppError::config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(AppError::config("embedding.batch_size must be greater than 0"));
        }
        if self.embedding.max_retries == 0 {
            return Err(AppError::config("embedding.max_retries must be at least 1"));
        }
        if self.openai.timeout_secs == 0 {
            return Err(AppError::config("openai.timeout_secs must be greater than 0"));
        }
        if self.assistant.poll_interval_ms == 0 {
            return Err(AppError::config("assistant.poll_interval_ms must be greater than 0"));
        }
        if self.index.top_k == 0 {
            return Err(AppError::config("index.top_k must be greater than 0"));
        }
        if self.prompt.persona.trim().is_empty() {
            return Err(AppError::config("prompt.persona must not be empty"));
        }
        if self.prompt.formatting_rules.is_empty() {
            return Err(AppError::config("prompt.formatting_rules must not be empty"));
        }
        Ok(())
    }

    /// Timeout for model service requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }

    /// Base delay between embedding attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.embedding.retry_delay_ms)
    }

    /// Delay between run status polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.assistant.poll_interval_ms)
    }

    /// Bound on a single run, `None` when disabled
    pub fn max_run_wait(&self) -> Option<Duration> {
        match self.assistant.max_wait_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Idle lifetime of a conversation session
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.server.session_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            openai: OpenAiConfig {
                api_key: String::new(),
                api_base: default_api_base(),
                timeout_secs: default_openai_timeout(),
            },
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            index: IndexConfig {
                backend: default_index_backend(),
                url: default_index_url(),
                tenant: default_index_tenant(),
                database: default_index_database(),
                collection_name: "reguleringsplan".to_string(),
                top_k: default_top_k(),
            },
            chunking: ChunkingConfig::default(),
            assistant: AssistantConfig::default(),
            prompt: PromptConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.openai.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.index.top_k, 4);
        assert_eq!(config.completion.protocol, ChatProtocol::Assistant);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = valid();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_formatting_rules_rejected() {
        let mut config = valid();
        config.prompt.formatting_rules.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("formatting_rules"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = valid();
        config.assistant.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let mut config = valid();
        config.openai.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_chroma_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.index.tenant, "default_tenant");
        assert_eq!(config.index.database, "default_database");
    }

    #[test]
    fn test_unbounded_polling_when_zero() {
        let mut config = valid();
        assert_eq!(config.max_run_wait(), Some(Duration::from_secs(300)));
        config.assistant.max_wait_secs = 0;
        assert_eq!(config.max_run_wait(), None);
    }

    #[test]
    fn test_required_fields_enforced_on_deserialize() {
        let parsed: std::result::Result<AppConfig, _> = Config::builder()
            .set_override("openai.api_key", "sk-test")
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize());
        // index.collection_name has no default
        assert!(parsed.is_err());

        let parsed: AppConfig = Config::builder()
            .set_override("openai.api_key", "sk-test")
            .and_then(|b| b.set_override("index.collection_name", "plan"))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();
        assert_eq!(parsed.index.collection_name, "plan");
        assert_eq!(parsed.embedding.batch_size, 100);
        assert!(parsed.validate().is_ok());
    }
}
