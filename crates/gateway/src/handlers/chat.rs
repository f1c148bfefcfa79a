//! Streaming chat handler
//!
//! `POST /chat` answers a query as a `text/event-stream`, one `data:`
//! frame per piece produced by the chat engine. Validation failures are
//! plain JSON errors; once the stream has started, failures arrive as an
//! `Error: ...` piece instead of a status code.
//!
//! Request metrics are recorded when the answer stream ends: 200 once it
//! ran to completion, 499 when the client went away first.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use ragline_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::task::Poll;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub query: String,

    /// Overrides the session header when present
    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
}

/// Stream the answer to one query
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let metrics = RequestMetrics::start("POST", "/chat");

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation {
            message: "Query must not be blank".to_string(),
            field: Some("query".to_string()),
        });
    }
    let query_chars = query.chars().count();
    if query_chars > state.config.server.max_query_chars {
        return Err(AppError::Validation {
            message: format!(
                "Query is {} characters, the limit is {}",
                query_chars, state.config.server.max_query_chars
            ),
            field: Some("query".to_string()),
        });
    }

    let session_id = resolve_session_id(&request, &headers, &state.session_header);
    let session_value = HeaderValue::from_str(&session_id).map_err(|_| AppError::Validation {
        message: "Session id is not a valid header value".to_string(),
        field: Some("session_id".to_string()),
    })?;

    let conversation = state.sessions.get_or_create(&session_id).await;

    info!(
        session_id = %session_id,
        protocol = state.engine.protocol(),
        query_chars,
        "Chat turn started"
    );

    let pieces = state.engine.respond(conversation, query.to_string());
    let events = record_on_completion(pieces, metrics)
        .map(|piece| Ok::<_, Infallible>(Event::default().data(piece.replace('\r', ""))));

    Ok((
        [(state.session_header.clone(), session_value)],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

/// Nginx's "client closed request"
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Finishes the request metrics exactly once
struct StreamMetrics(Option<RequestMetrics>);

impl StreamMetrics {
    fn finish(&mut self, status: u16) {
        if let Some(metrics) = self.0.take() {
            metrics.finish(status);
        }
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        self.finish(CLIENT_CLOSED_REQUEST);
    }
}

/// Pass `stream` through, recording `metrics` when it is exhausted or dropped
fn record_on_completion<S>(stream: S, metrics: RequestMetrics) -> impl Stream<Item = S::Item>
where
    S: Stream,
{
    let mut guard = StreamMetrics(Some(metrics));
    stream.chain(futures::stream::poll_fn(move |_| {
        guard.finish(200);
        Poll::Ready(None)
    }))
}

/// Session id from the body, then the session header, else a new one
fn resolve_session_id(request: &ChatRequest, headers: &HeaderMap, header: &HeaderName) -> String {
    request
        .session_id
        .as_deref()
        .or_else(|| headers.get(header).and_then(|value| value.to_str().ok()))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
