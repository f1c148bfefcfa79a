//! Language model service clients
//!
//! Provides:
//! - Streamed chat completions (stateless protocol)
//! - Threads, messages and runs (stateful protocol)
//! - SSE frame decoding shared by the streaming paths

mod assistants;
mod completion;
pub mod sse;
pub mod types;

pub use assistants::{AssistantRegistry, AssistantsService, OpenAiAssistantsClient};
pub use completion::{decode_text_stream, CompletionService, OpenAiChatClient, TextStream};
pub use types::{AssistantSpec, ChatMessage, CompletionRequest, Role, Run, RunStatus, ThreadMessage};

use crate::config::AppConfig;
use crate::errors::Result;
use std::sync::Arc;

/// Completion client for the configured endpoint
pub fn create_completion_service(config: &AppConfig) -> Result<Arc<dyn CompletionService>> {
    Ok(Arc::new(OpenAiChatClient::new(
        config.openai.api_key.clone(),
        config.openai.api_base.clone(),
        config.request_timeout(),
    )?))
}

/// Assistants client for the configured endpoint
pub fn create_assistants_service(config: &AppConfig) -> Result<Arc<dyn AssistantsService>> {
    Ok(Arc::new(OpenAiAssistantsClient::new(
        &config.openai.api_key,
        config.openai.api_base.clone(),
        config.request_timeout(),
    )?))
}
