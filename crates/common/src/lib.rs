//! Ragline Common Library
//!
//! Shared code for the Ragline services including:
//! - Document, chunk and embedding record models
//! - Tokenizer and embedding client abstractions
//! - Vector index reader/writer over a similarity search service
//! - Context retrieval and prompt building
//! - Language model service clients
//! - Conversation engines (stateless streaming and run polling)
//! - Error types, configuration and metrics

pub mod config;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod index;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod tokenizer;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::{EmbeddingClient, EmbeddingService};
pub use engine::{ChatEngine, Conversation, SharedConversation};
pub use errors::{AppError, Result};
pub use index::VectorStore;
pub use tokenizer::Tokenizer;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default completion model
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini-2024-07-18";
