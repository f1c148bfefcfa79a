//! Stateful thread / run service
//!
//! Provides:
//! - [`AssistantsService`]: thread, message, assistant and run operations
//! - [`OpenAiAssistantsClient`]: the OpenAI Assistants v2 REST API
//! - [`AssistantRegistry`]: process-wide, lazily created assistant id

use super::types::{AssistantSpec, Role, Run, ThreadMessage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Remote conversation memory driven through runs
#[async_trait]
pub trait AssistantsService: Send + Sync {
    /// Create an empty thread; returns its id
    async fn create_thread(&self) -> Result<String>;

    /// Append a message to a thread
    async fn create_message(&self, thread_id: &str, role: Role, content: &str) -> Result<()>;

    /// Register an assistant definition; returns its id
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String>;

    /// Start a run of `assistant_id` over the thread
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;

    /// Current state of a run
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Messages of a thread, newest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}

/// OpenAI Assistants v2 client
pub struct OpenAiAssistantsClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: String,
    role: Role,
    #[serde(default)]
    content: Vec<RawContent>,
}

#[derive(Deserialize)]
struct RawContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<RawText>,
}

#[derive(Deserialize)]
struct RawText {
    value: String,
}

impl From<RawMessage> for ThreadMessage {
    fn from(raw: RawMessage) -> Self {
        let text = raw
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.map(|t| t.value))
            .collect();

        ThreadMessage {
            id: raw.id,
            role: raw.role,
            text,
        }
    }
}

impl OpenAiAssistantsClient {
    pub fn new(api_key: &str, base_url: String, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| AppError::config(format!("Invalid API key: {}", e)))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::transient("assistants", format!("{} failed: {}", what, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::transient("assistants", format!("{} body unreadable: {}", what, e)))?;

        if !status.is_success() {
            return Err(AppError::transient(
                "assistants",
                format!("{} returned {}: {}", what, status, body),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::parse(format!("Unexpected {} response: {}", what, e)))
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B, what: &str) -> Result<T> {
        let request = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        self.send(request, what).await
    }
}

#[async_trait]
impl AssistantsService for OpenAiAssistantsClient {
    async fn create_thread(&self) -> Result<String> {
        let thread: IdResponse = self.post("/threads", &json!({}), "create thread").await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn create_message(&self, thread_id: &str, role: Role, content: &str) -> Result<()> {
        let _: IdResponse = self
            .post(
                &format!("/threads/{}/messages", thread_id),
                &json!({ "role": role, "content": content }),
                "create message",
            )
            .await?;
        Ok(())
    }

    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        let assistant: IdResponse = self.post("/assistants", spec, "create assistant").await?;
        Ok(assistant.id)
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        self.post(
            &format!("/threads/{}/runs", thread_id),
            &json!({ "assistant_id": assistant_id }),
            "create run",
        )
        .await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let request = self
            .client
            .get(format!("{}/threads/{}/runs/{}", self.base_url, thread_id, run_id));
        self.send(request, "get run").await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let request = self
            .client
            .get(format!("{}/threads/{}/messages", self.base_url, thread_id))
            .query(&[("order", "desc"), ("limit", "20")]);
        let list: MessageList = self.send(request, "list messages").await?;
        Ok(list.data.into_iter().map(ThreadMessage::from).collect())
    }
}

/// Lazily created assistant definition, shared by every conversation.
///
/// Concurrent first callers wait on one creation request; a failed
/// creation leaves the registry empty so the next caller tries again.
pub struct AssistantRegistry {
    service: Arc<dyn AssistantsService>,
    spec: AssistantSpec,
    id: OnceCell<String>,
}

impl AssistantRegistry {
    pub fn new(service: Arc<dyn AssistantsService>, spec: AssistantSpec) -> Self {
        Self {
            service,
            spec,
            id: OnceCell::new(),
        }
    }

    /// Id of the assistant, creating it on first use
    pub async fn assistant_id(&self) -> Result<String> {
        let id = self
            .id
            .get_or_try_init(|| async {
                let id = self.service.create_assistant(&self.spec).await?;
                info!(assistant_id = %id, name = %self.spec.name, "Created assistant");
                Ok::<_, AppError>(id)
            })
            .await?;
        Ok(id.clone())
    }
}
