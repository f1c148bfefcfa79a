//! Streamed chat completions

use super::sse::{parse_event, SseDecoder};
use super::types::CompletionRequest;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Incremental text deltas; an `Err` item ends the stream
pub type TextStream = BoxStream<'static, Result<String>>;

/// Stateless completion service
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Open one streamed completion
    async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream>;
}

/// OpenAI `/chat/completions` client
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct StreamingBody<'a> {
    #[serde(flatten)]
    request: &'a CompletionRequest,
    stream: bool,
}

impl OpenAiChatClient {
    /// `idle_timeout` bounds connecting and each wait for the next body
    /// chunk; a long answer that keeps producing deltas is never cut off.
    pub fn new(api_key: String, base_url: String, idle_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(idle_timeout)
            .read_timeout(idle_timeout)
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

/// Turn a byte stream of SSE frames into text deltas
pub fn decode_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(AppError::transient("completion", format!("Stream interrupted: {}", e)));
                    return;
                }
            };

            for payload in decoder.push(chunk.as_ref()) {
                match parse_event(&payload) {
                    Ok(event) => {
                        if let Some(text) = event.into_text().filter(|t| !t.is_empty()) {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            match parse_event(&payload) {
                Ok(event) => {
                    if let Some(text) = event.into_text().filter(|t| !t.is_empty()) {
                        yield Ok(text);
                    }
                }
                Err(e) => yield Err(e),
            }
        }
    };

    Box::pin(stream)
}

#[async_trait]
impl CompletionService for OpenAiChatClient {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, messages = request.messages.len(), "Opening completion stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&StreamingBody {
                request: &request,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| AppError::transient("completion", format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::transient(
                "completion",
                format!("API error {}: {}", status, body),
            ));
        }

        Ok(decode_text_stream(response.bytes_stream()))
    }
}
