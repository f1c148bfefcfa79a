//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Ragline metrics
pub const METRICS_PREFIX: &str = "ragline";

/// Histogram buckets for request latency (in seconds).
/// Chat requests stream for seconds, so the tail is long.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.025,  // 25ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

fn name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(name("requests_total"), Unit::Count, "Total number of HTTP requests");
    describe_histogram!(
        name("request_duration_seconds"),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        name("embedding_requests_total"),
        Unit::Count,
        "Total embedding API requests"
    );
    describe_histogram!(
        name("embedding_duration_seconds"),
        Unit::Seconds,
        "Embedding request latency in seconds"
    );
    describe_counter!(
        name("embedding_errors_total"),
        Unit::Count,
        "Total embedding API errors"
    );
    describe_counter!(
        name("embedding_retries_total"),
        Unit::Count,
        "Embedding batches re-submitted after a failure"
    );

    // Retrieval metrics
    describe_counter!(
        name("retrieval_queries_total"),
        Unit::Count,
        "Total nearest-neighbour queries"
    );
    describe_histogram!(
        name("retrieval_duration_seconds"),
        Unit::Seconds,
        "Context retrieval latency in seconds"
    );
    describe_gauge!(
        name("retrieval_results_count"),
        Unit::Count,
        "Number of passages returned by the last query"
    );

    // Ingestion metrics
    describe_counter!(
        name("documents_ingested_total"),
        Unit::Count,
        "Total source documents ingested"
    );
    describe_counter!(name("chunks_created_total"), Unit::Count, "Total chunks created");
    describe_histogram!(
        name("ingestion_duration_seconds"),
        Unit::Seconds,
        "Index build latency in seconds"
    );

    // Conversation metrics
    describe_counter!(name("chat_turns_total"), Unit::Count, "Total answered queries");
    describe_counter!(
        name("chat_errors_total"),
        Unit::Count,
        "Queries answered with an error token"
    );
    describe_counter!(name("run_polls_total"), Unit::Count, "Run status polls issued");
    describe_histogram!(
        name("run_duration_seconds"),
        Unit::Seconds,
        "Time from run creation to terminal status"
    );
    describe_gauge!(
        name("sessions_active"),
        Unit::Count,
        "Conversation sessions currently held"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            name("requests_total"),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            name("request_duration_seconds"),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        name("embedding_requests_total"),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(name("embedding_duration_seconds"), "model" => model.to_string())
            .record(duration_secs);
        tracing::trace!(model, batch_size, duration_secs, "Embedding request recorded");
    } else {
        counter!(name("embedding_errors_total"), "model" => model.to_string()).increment(1);
    }
}

/// Count one embedding retry
pub fn record_embedding_retry(model: &str) {
    counter!(name("embedding_retries_total"), "model" => model.to_string()).increment(1);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, collection: &str, result_count: usize) {
    counter!(name("retrieval_queries_total"), "collection" => collection.to_string()).increment(1);

    histogram!(name("retrieval_duration_seconds"), "collection" => collection.to_string())
        .record(duration_secs);

    gauge!(name("retrieval_results_count"), "collection" => collection.to_string())
        .set(result_count as f64);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, documents: usize, chunks_created: usize, collection: &str) {
    counter!(name("documents_ingested_total"), "collection" => collection.to_string())
        .increment(documents as u64);

    counter!(name("chunks_created_total"), "collection" => collection.to_string())
        .increment(chunks_created as u64);

    histogram!(name("ingestion_duration_seconds")).record(duration_secs);
}

/// Record one answered query and whether it ended in an error token
pub fn record_chat_turn(protocol: &str, errored: bool) {
    counter!(name("chat_turns_total"), "protocol" => protocol.to_string()).increment(1);
    if errored {
        counter!(name("chat_errors_total"), "protocol" => protocol.to_string()).increment(1);
    }
}

/// Record a finished run and how many status polls it took
pub fn record_run(duration_secs: f64, polls: u64, status: &str) {
    counter!(name("run_polls_total")).increment(polls);
    histogram!(name("run_duration_seconds"), "status" => status.to_string()).record(duration_secs);
}

/// Current number of conversation sessions
pub fn set_active_sessions(count: usize) {
    gauge!(name("sessions_active")).set(count as f64);
}
