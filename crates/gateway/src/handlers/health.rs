//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::{Duration, Instant};
use crate::AppState;

/// Upper bound on the index probe of a readiness check
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub protocol: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub vector_index: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: ragline_common::VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe - checks that the configured collection answers
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();
    let collection = &state.config.index.collection_name;

    let index_check = match state.reader.probe(collection, PROBE_TIMEOUT).await {
        Ok(records) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            records: Some(records),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, collection = %collection, "Readiness check failed");
            CheckResult {
                status: "down".to_string(),
                latency_ms: None,
                records: None,
                error: Some(e.to_string()),
            }
        }
    };

    let all_healthy = index_check.status == "up";
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            protocol: state.engine.protocol().to_string(),
            checks: HealthChecks {
                vector_index: index_check,
            },
        }),
    )
}
