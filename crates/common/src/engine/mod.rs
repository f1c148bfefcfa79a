//! Conversation engines
//!
//! Two interchangeable ways of answering a query as a stream of text
//! pieces:
//! - [`StatelessEngine`]: one streamed completion per query
//! - [`RunPollingEngine`]: a persistent remote thread driven through runs
//!
//! Neither engine fails past its stream: every error becomes a single
//! final `Error: ...` piece.

mod conversation;
mod run_polling;
mod stateless;

pub use conversation::{Conversation, SharedConversation};
pub use run_polling::RunPollingEngine;
pub use stateless::{CompletionSettings, StatelessEngine};

use crate::config::{AppConfig, ChatProtocol};
use crate::context::{ContextRetriever, PromptBuilder};
use crate::errors::Result;
use crate::llm::{self, AssistantRegistry, AssistantSpec};
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::info;

/// Answers one query as a lazy, finite stream of text pieces
pub trait ChatEngine: Send + Sync {
    /// Stateless engines ignore `conversation`; the stateful engine holds
    /// its lock until the stream ends.
    fn respond(&self, conversation: SharedConversation, query: String) -> BoxStream<'static, String>;

    /// Protocol name for logs and metrics
    fn protocol(&self) -> &'static str;
}

/// Build the engine selected by `completion.protocol`
pub fn create_chat_engine(
    config: &AppConfig,
    retriever: ContextRetriever,
    prompt: PromptBuilder,
) -> Result<Arc<dyn ChatEngine>> {
    let engine: Arc<dyn ChatEngine> = match config.completion.protocol {
        ChatProtocol::Stateless => Arc::new(StatelessEngine::new(
            retriever,
            prompt,
            llm::create_completion_service(config)?,
            CompletionSettings::from(&config.completion),
        )),
        ChatProtocol::Assistant => {
            let service = llm::create_assistants_service(config)?;
            let registry = AssistantRegistry::new(
                service.clone(),
                AssistantSpec {
                    name: config.assistant.name.clone(),
                    instructions: prompt.instructions(),
                    model: config.completion.model.clone(),
                },
            );
            Arc::new(RunPollingEngine::new(
                retriever,
                service,
                Arc::new(registry),
                config.poll_interval(),
                config.max_run_wait(),
            ))
        }
    };

    info!(protocol = engine.protocol(), model = %config.completion.model, "Chat engine ready");
    Ok(engine)
}
