//! Server-sent event decoding for streamed completions
//!
//! Network reads do not respect frame boundaries; [`SseDecoder`] buffers raw
//! bytes and only hands out complete `data:` payloads, so multi-byte
//! characters split across reads survive intact.

use crate::errors::{AppError, Result};
use serde_json::Value;

/// End-of-stream sentinel sent by OpenAI-compatible services
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental `data:` line extractor
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of every completed `data:` line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = Self::payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Payload of a trailing line that was never newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::payload(&line)
    }

    fn payload(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);

        // Comments, event names, ids and blank separators carry no data
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.is_empty() || data == DONE_SENTINEL {
            return None;
        }
        Some(data.to_string())
    }
}

/// Text part of a structured delta
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
}

/// One decoded completion chunk
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain string delta
    TextDelta(String),
    /// Delta delivered as typed content parts
    ContentBlockDelta(Vec<TextBlock>),
    /// Role announcements, finish markers, usage records
    Other,
}

impl StreamEvent {
    /// Text carried by this event, if any
    pub fn into_text(self) -> Option<String> {
        match self {
            StreamEvent::TextDelta(text) => Some(text),
            StreamEvent::ContentBlockDelta(blocks) => {
                Some(blocks.into_iter().map(|b| b.text).collect())
            }
            StreamEvent::Other => None,
        }
    }
}

/// Decode one chunk payload.
///
/// A payload without `choices` is malformed; an embedded `error` object is
/// a service failure reported mid-stream.
pub fn parse_event(payload: &str) -> Result<StreamEvent> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| AppError::parse(format!("Invalid stream chunk: {}", e)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(AppError::transient("completion", message));
    }

    let choices = value
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::parse("Stream chunk has no choices"))?;

    let content = match choices.first().and_then(|c| c.get("delta")).and_then(|d| d.get("content")) {
        Some(content) => content,
        None => return Ok(StreamEvent::Other),
    };

    match content {
        Value::String(text) => Ok(StreamEvent::TextDelta(text.clone())),
        Value::Array(parts) => Ok(StreamEvent::ContentBlockDelta(
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .map(|text| TextBlock { text: text.to_string() })
                .collect(),
        )),
        Value::Null => Ok(StreamEvent::Other),
        other => Err(AppError::parse(format!("Unexpected delta content: {}", other))),
    }
}
