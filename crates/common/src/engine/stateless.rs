use super::{ChatEngine, SharedConversation};
use crate::config::CompletionConfig;
use crate::context::{ContextRetriever, PromptBuilder};
use crate::errors::Result;
use crate::llm::{ChatMessage, CompletionRequest, CompletionService, TextStream};
use crate::metrics;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Model parameters of a completion request
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&CompletionConfig> for CompletionSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Retrieval, prompt and one streamed completion per query; keeps no state
#[derive(Clone)]
pub struct StatelessEngine {
    retriever: ContextRetriever,
    prompt: Arc<PromptBuilder>,
    completion: Arc<dyn CompletionService>,
    settings: CompletionSettings,
}

impl StatelessEngine {
    pub fn new(
        retriever: ContextRetriever,
        prompt: PromptBuilder,
        completion: Arc<dyn CompletionService>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            retriever,
            prompt: Arc::new(prompt),
            completion,
            settings,
        }
    }

    async fn open(&self, query: &str) -> Result<TextStream> {
        let context = self.retriever.get_relevant_context(query).await?;
        let prompt = self.prompt.build_prompt(query, &context);
        debug!(prompt_chars = prompt.len(), "Prompt built");

        self.completion
            .stream_completion(CompletionRequest {
                model: self.settings.model.clone(),
                messages: vec![ChatMessage::user(prompt)],
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await
    }
}

impl ChatEngine for StatelessEngine {
    fn respond(&self, _conversation: SharedConversation, query: String) -> BoxStream<'static, String> {
        let engine = self.clone();

        let stream = async_stream::stream! {
            let mut errored = false;

            match engine.open(&query).await {
                Ok(mut deltas) => {
                    while let Some(delta) = deltas.next().await {
                        match delta {
                            Ok(text) => yield text,
                            Err(e) => {
                                warn!(error = %e, "Completion stream failed");
                                errored = true;
                                yield e.to_stream_token();
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to start completion");
                    errored = true;
                    yield e.to_stream_token();
                }
            }

            metrics::record_chat_turn("stateless", errored);
        };

        Box::pin(stream)
    }

    fn protocol(&self) -> &'static str {
        "stateless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptConfig;
    use crate::engine::test_support::memory_retriever;
    use crate::engine::Conversation;
    use crate::errors::AppError;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Replays scripted deltas and keeps every prompt it was sent
    struct ScriptedCompletion {
        deltas: Vec<std::result::Result<&'static str, &'static str>>,
        refuse: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn new(deltas: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
            Self {
                deltas,
                refuse: false,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            if self.refuse {
                return Err(AppError::transient("completion", "401 Unauthorized"));
            }
            let items: Vec<Result<String>> = self
                .deltas
                .iter()
                .map(|d| match d {
                    Ok(text) => Ok(text.to_string()),
                    Err(msg) => Err(AppError::parse(*msg)),
                })
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    async fn engine(completion: Arc<ScriptedCompletion>) -> StatelessEngine {
        StatelessEngine::new(
            memory_retriever(&["Forskrift om e-resept", "Kjernejournalforskriften"], 4).await,
            PromptBuilder::new(&PromptConfig::default()).unwrap(),
            completion,
            CompletionSettings {
                model: "gpt-4o-mini-2024-07-18".into(),
                temperature: 0.7,
                max_tokens: 2000,
            },
        )
    }

    #[tokio::test]
    async fn test_forwards_deltas_in_order() {
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok("<p>"), Ok("Svar"), Ok("</p>")]));
        let engine = engine(completion.clone()).await;

        let pieces: Vec<String> = engine
            .respond(Conversation::shared(), "Hva er e-resept?".into())
            .collect()
            .await;

        assert_eq!(pieces, vec!["<p>", "Svar", "</p>"]);
        let prompts = completion.prompts.lock().unwrap();
        assert!(prompts[0].contains("Kjernejournalforskriften"));
        assert!(prompts[0].contains("Question: Hva er e-resept?"));
    }

    #[tokio::test]
    async fn test_every_call_retrieves_context_again() {
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok("ok")]));
        let engine = engine(completion.clone()).await;
        let conversation = Conversation::shared();

        for query in ["første", "andre"] {
            let _: Vec<String> = engine.respond(conversation.clone(), query.into()).collect().await;
        }

        let prompts = completion.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p.contains("Forskrift om e-resept")));
        assert_eq!(*conversation.lock().await, Conversation::new());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_ends_with_one_error_piece() {
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Ok("partial"),
            Err("Stream chunk has no choices"),
            Ok("never"),
        ]));
        let engine = engine(completion).await;

        let pieces: Vec<String> = engine.respond(Conversation::shared(), "q".into()).collect().await;

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "partial");
        assert!(pieces[1].starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_refused_request_yields_error_piece() {
        let mut scripted = ScriptedCompletion::new(vec![]);
        scripted.refuse = true;
        let engine = engine(Arc::new(scripted)).await;

        let pieces: Vec<String> = engine.respond(Conversation::shared(), "q".into()).collect().await;

        assert_eq!(pieces, vec!["Error: completion service error: 401 Unauthorized"]);
    }
}
