use super::{ChatEngine, Conversation, SharedConversation};
use crate::context::{enrich_first_turn, ContextRetriever};
use crate::errors::{AppError, Result};
use crate::llm::{AssistantRegistry, AssistantsService, Role, Run, RunStatus};
use crate::metrics;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Stateful protocol: one remote thread per conversation, one run per turn
#[derive(Clone)]
pub struct RunPollingEngine {
    retriever: ContextRetriever,
    assistants: Arc<dyn AssistantsService>,
    registry: Arc<AssistantRegistry>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl RunPollingEngine {
    /// `max_wait` bounds a single run; `None` polls until a terminal status
    pub fn new(
        retriever: ContextRetriever,
        assistants: Arc<dyn AssistantsService>,
        registry: Arc<AssistantRegistry>,
        poll_interval: Duration,
        max_wait: Option<Duration>,
    ) -> Self {
        Self {
            retriever,
            assistants,
            registry,
            poll_interval,
            max_wait,
        }
    }

    /// Drive one turn to completion and return the reply text
    #[instrument(skip_all, fields(thread_id = ?conversation.thread_id, first_turn = conversation.is_first_turn))]
    async fn run_turn(&self, conversation: &mut Conversation, query: &str) -> Result<String> {
        let thread_id = match &conversation.thread_id {
            Some(id) => id.clone(),
            None => {
                let id = self.assistants.create_thread().await?;
                info!(thread_id = %id, "Started conversation thread");
                conversation.thread_id = Some(id.clone());
                conversation.is_first_turn = true;
                id
            }
        };

        let content = if conversation.is_first_turn {
            let context = self.retriever.get_relevant_context(query).await?;
            enrich_first_turn(query, &context)
        } else {
            query.to_string()
        };

        self.assistants
            .create_message(&thread_id, Role::User, &content)
            .await?;
        conversation.is_first_turn = false;

        let assistant_id = self.registry.assistant_id().await?;
        let run = self.assistants.create_run(&thread_id, &assistant_id).await?;
        debug!(thread_id = %thread_id, run_id = %run.id, status = %run.status, "Run created");

        match self.wait_for_run(&thread_id, run).await? {
            RunStatus::Completed => self.latest_reply(&thread_id).await,
            status => Err(AppError::TerminalRun {
                status: status.to_string(),
            }),
        }
    }

    /// Poll at a fixed interval until the run settles.
    ///
    /// A run that asks for tool output cannot progress here and is reported
    /// as is; a run outliving `max_wait` is reported as expired.
    async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> Result<RunStatus> {
        let start = Instant::now();
        let mut polls = 0u64;

        while !run.status.is_terminal() && run.status != RunStatus::RequiresAction {
            if let Some(max_wait) = self.max_wait {
                if start.elapsed() >= max_wait {
                    warn!(
                        run_id = %run.id,
                        last_status = %run.status,
                        waited_secs = start.elapsed().as_secs(),
                        "Run exceeded maximum wait"
                    );
                    metrics::record_run(start.elapsed().as_secs_f64(), polls, "expired");
                    return Ok(RunStatus::Expired);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
            run = self.assistants.get_run(thread_id, &run.id).await?;
            polls += 1;
            debug!(run_id = %run.id, status = %run.status, polls, "Polled run");
        }

        if let Some(error) = &run.last_error {
            warn!(
                run_id = %run.id,
                status = %run.status,
                code = %error.code,
                message = %error.message,
                "Run ended with error"
            );
        }

        metrics::record_run(start.elapsed().as_secs_f64(), polls, run.status.as_str());
        Ok(run.status)
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<String> {
        let messages = self.assistants.list_messages(thread_id).await?;
        match messages.into_iter().next() {
            Some(message) if message.role == Role::Assistant => Ok(message.text),
            Some(message) => {
                warn!(thread_id, message_id = %message.id, role = ?message.role, "Newest message is not from the assistant");
                Ok(String::new())
            }
            None => {
                warn!(thread_id, "Thread has no messages after completed run");
                Ok(String::new())
            }
        }
    }
}

impl ChatEngine for RunPollingEngine {
    fn respond(&self, conversation: SharedConversation, query: String) -> BoxStream<'static, String> {
        let engine = self.clone();

        let stream = async_stream::stream! {
            let mut conversation = conversation.lock_owned().await;

            match engine.run_turn(&mut conversation, &query).await {
                Ok(reply) => {
                    metrics::record_chat_turn("assistant", false);
                    for piece in reply.split_inclusive(char::is_whitespace) {
                        yield piece.to_string();
                    }
                }
                Err(e) => {
                    if let AppError::TerminalRun { status } = &e {
                        warn!(
                            status = %status,
                            thread_id = ?conversation.thread_id,
                            "Run ended without an answer, resetting conversation"
                        );
                        conversation.reset();
                    } else {
                        warn!(error = %e, "Assistant turn failed");
                    }
                    metrics::record_chat_turn("assistant", true);
                    yield e.to_stream_token();
                }
            }
        };

        Box::pin(stream)
    }

    fn protocol(&self) -> &'static str {
        "assistant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::memory_retriever;
    use crate::llm::{AssistantSpec, ThreadMessage};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Thread service whose runs walk through a scripted status sequence
    struct ScriptedAssistants {
        statuses: Mutex<VecDeque<RunStatus>>,
        reply: String,
        reply_role: Role,
        threads_created: AtomicUsize,
        assistants_created: AtomicUsize,
        posted: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedAssistants {
        fn new(reply: &str) -> Self {
            Self {
                statuses: Mutex::new(VecDeque::new()),
                reply: reply.to_string(),
                reply_role: Role::Assistant,
                threads_created: AtomicUsize::new(0),
                assistants_created: AtomicUsize::new(0),
                posted: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, statuses: &[RunStatus]) {
            self.statuses.lock().unwrap().extend(statuses.iter().copied());
        }

        fn next_status(&self) -> Result<RunStatus> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::transient("assistants", "status script exhausted"))
        }

        fn posted(&self) -> Vec<(String, String)> {
            self.posted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantsService for ScriptedAssistants {
        async fn create_thread(&self) -> Result<String> {
            let n = self.threads_created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("thread_{}", n + 1))
        }

        async fn create_message(&self, thread_id: &str, _role: Role, content: &str) -> Result<()> {
            self.posted
                .lock()
                .unwrap()
                .push((thread_id.to_string(), content.to_string()));
            Ok(())
        }

        async fn create_assistant(&self, _spec: &AssistantSpec) -> Result<String> {
            self.assistants_created.fetch_add(1, Ordering::SeqCst);
            Ok("asst_1".into())
        }

        async fn create_run(&self, _thread_id: &str, assistant_id: &str) -> Result<Run> {
            assert_eq!(assistant_id, "asst_1");
            Ok(Run {
                id: "run_1".into(),
                status: self.next_status()?,
                last_error: None,
            })
        }

        async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
            Ok(Run {
                id: run_id.to_string(),
                status: self.next_status()?,
                last_error: None,
            })
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>> {
            Ok(vec![ThreadMessage {
                id: "msg_2".into(),
                role: self.reply_role,
                text: self.reply.clone(),
            }])
        }
    }

    async fn engine(service: Arc<ScriptedAssistants>, max_wait: Option<Duration>) -> RunPollingEngine {
        let registry = AssistantRegistry::new(
            service.clone(),
            AssistantSpec {
                name: "Health Sector Digitalization Expert".into(),
                instructions: "Answer in HTML.".into(),
                model: "gpt-4o-mini-2024-07-18".into(),
            },
        );
        RunPollingEngine::new(
            memory_retriever(&["Normen krever tilgangsstyring"], 4).await,
            service,
            Arc::new(registry),
            Duration::from_millis(1),
            max_wait,
        )
    }

    async fn answer(engine: &RunPollingEngine, conversation: &SharedConversation, query: &str) -> Vec<String> {
        engine.respond(conversation.clone(), query.into()).collect().await
    }

    #[tokio::test]
    async fn test_completed_run_streams_reply() {
        let service = Arc::new(ScriptedAssistants::new("<p>Normen gjelder  alle.</p>"));
        service.script(&[RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]);
        let engine = engine(service.clone(), None).await;
        let conversation = Conversation::shared();

        let pieces = answer(&engine, &conversation, "Hva sier Normen?").await;

        assert_eq!(pieces.concat(), "<p>Normen gjelder  alle.</p>");
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| !p.starts_with("Error:")));

        let state = conversation.lock().await.clone();
        assert_eq!(state.thread_id.as_deref(), Some("thread_1"));
        assert!(!state.is_first_turn);
    }

    #[tokio::test]
    async fn test_failed_run_resets_conversation() {
        let service = Arc::new(ScriptedAssistants::new("unused"));
        service.script(&[RunStatus::Queued, RunStatus::Failed]);
        let engine = engine(service, None).await;
        let conversation = Conversation::shared();

        let pieces = answer(&engine, &conversation, "q").await;

        assert_eq!(pieces, vec!["Error: Assistant run failed. Please try again."]);
        assert_eq!(*conversation.lock().await, Conversation::new());
    }

    #[tokio::test]
    async fn test_context_attached_on_first_turn_only() {
        let service = Arc::new(ScriptedAssistants::new("svar"));
        service.script(&[RunStatus::Completed, RunStatus::Completed]);
        let engine = engine(service.clone(), None).await;
        let conversation = Conversation::shared();

        answer(&engine, &conversation, "Første spørsmål").await;
        answer(&engine, &conversation, "Oppfølging").await;

        let posted = service.posted();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].0, posted[1].0);
        assert!(posted[0].1.starts_with("Context:\nNormen krever tilgangsstyring"));
        assert!(posted[0].1.ends_with("\n\nQuestion: Første spørsmål"));
        assert_eq!(posted[1].1, "Oppfølging");
        assert_eq!(service.threads_created.load(Ordering::SeqCst), 1);
        assert_eq!(service.assistants_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_thread_after_reset_gets_context_again() {
        let service = Arc::new(ScriptedAssistants::new("svar"));
        service.script(&[RunStatus::Cancelled, RunStatus::Completed]);
        let engine = engine(service.clone(), None).await;
        let conversation = Conversation::shared();

        let first = answer(&engine, &conversation, "a").await;
        answer(&engine, &conversation, "b").await;

        assert_eq!(first, vec!["Error: Assistant run cancelled. Please try again."]);
        let posted = service.posted();
        assert_eq!(posted[0].0, "thread_1");
        assert_eq!(posted[1].0, "thread_2");
        assert!(posted[1].1.starts_with("Context:\n"));
    }

    #[tokio::test]
    async fn test_run_exceeding_max_wait_is_expired() {
        let service = Arc::new(ScriptedAssistants::new("unused"));
        service.script(&[RunStatus::InProgress; 64]);
        let engine = engine(service, Some(Duration::ZERO)).await;
        let conversation = Conversation::shared();

        let pieces = answer(&engine, &conversation, "q").await;

        assert_eq!(pieces, vec!["Error: Assistant run expired. Please try again."]);
        assert!(conversation.lock().await.thread_id.is_none());
    }

    #[tokio::test]
    async fn test_service_error_keeps_thread() {
        let service = Arc::new(ScriptedAssistants::new("unused"));
        service.script(&[RunStatus::Queued]);
        let engine = engine(service, None).await;
        let conversation = Conversation::shared();

        let pieces = answer(&engine, &conversation, "q").await;

        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].starts_with("Error: assistants service error"));
        assert_eq!(conversation.lock().await.thread_id.as_deref(), Some("thread_1"));
    }

    #[tokio::test]
    async fn test_reply_not_from_assistant_is_dropped() {
        let mut scripted = ScriptedAssistants::new("echo");
        scripted.reply_role = Role::User;
        let service = Arc::new(scripted);
        service.script(&[RunStatus::Completed]);
        let engine = engine(service, None).await;

        let pieces = answer(&engine, &Conversation::shared(), "q").await;

        assert!(pieces.is_empty());
    }
}
