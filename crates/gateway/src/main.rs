//! Ragline API Gateway
//!
//! HTTP boundary of the chat engine.
//! Handles:
//! - Streaming answers over server-sent events
//! - Per-session conversations with idle eviction
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod sessions;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::rate_limit::{rate_limit_middleware, RateLimit};
use ragline_common::{
    config::{AppConfig, ObservabilityConfig},
    context::{ContextRetriever, PromptBuilder},
    embeddings::{create_embedding_service, EmbeddingClient},
    engine::create_chat_engine,
    errors::AppError,
    index::{create_vector_store, VectorIndexReader},
    metrics,
    tokenizer::BpeTokenizer,
    ChatEngine,
};
use sessions::SessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<dyn ChatEngine>,
    pub sessions: SessionStore,
    pub reader: VectorIndexReader,
    pub session_header: HeaderName,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration before tracing so the log level applies
    let config = AppConfig::load();
    match &config {
        Ok(config) => init_tracing(&config.observability),
        Err(_) => init_tracing(&ObservabilityConfig::default()),
    }

    info!("Starting Ragline API Gateway v{}", ragline_common::VERSION);

    let config = Arc::new(config.map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?);

    // Initialize metrics
    install_metrics_exporter(config.observability.metrics_port)?;
    metrics::register_metrics();

    // Retrieval and the chat engine
    let tokenizer = Arc::new(BpeTokenizer::for_model(&config.embedding.model)?);
    let embeddings = Arc::new(EmbeddingClient::from_config(
        &config,
        create_embedding_service(&config)?,
        tokenizer,
    ));
    let reader = VectorIndexReader::new(create_vector_store(&config)?);
    let retriever = ContextRetriever::new(
        embeddings,
        reader.clone(),
        config.index.collection_name.clone(),
        config.index.top_k,
    );
    let engine = create_chat_engine(&config, retriever, PromptBuilder::new(&config.prompt)?)?;

    // Sessions
    let sessions = SessionStore::new(config.session_ttl());
    let sweep_period = (config.session_ttl() / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    sessions.spawn_sweeper(sweep_period);

    let session_header = HeaderName::from_bytes(config.server.session_header.as_bytes()).map_err(|e| {
        AppError::config(format!(
            "server.session_header {:?} is not a valid header name: {}",
            config.server.session_header, e
        ))
    })?;

    // Create app state
    let state = AppState {
        config: config.clone(),
        engine,
        sessions,
        reader,
        session_header,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    if observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Serve Prometheus metrics on `port`; 0 disables the exporter
fn install_metrics_exporter(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()?;

    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([state.session_header.clone()]);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Chat endpoint, rate limited
    let mut chat_routes = Router::new().route("/chat", post(handlers::chat::chat));
    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        chat_routes = chat_routes.route_layer(axum::middleware::from_fn_with_state(
            RateLimit::new(rate_limit.requests_per_second, rate_limit.burst),
            rate_limit_middleware,
        ));
    }

    // Health endpoints
    let health_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready));

    // Compose the app
    Router::new()
        .merge(health_routes)
        .merge(chat_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use futures::{stream::BoxStream, FutureExt, StreamExt};
    use ragline_common::{index::InMemoryVectorStore, SharedConversation, VectorStore};
    use tower::ServiceExt;

    /// Says "first" on a conversation's first turn, "again" afterwards,
    /// then echoes the query
    struct EchoEngine;

    impl ChatEngine for EchoEngine {
        fn respond(&self, conversation: SharedConversation, query: String) -> BoxStream<'static, String> {
            async move {
                let mut conversation = conversation.lock().await;
                let label = if conversation.is_first_turn { "first" } else { "again" };
                conversation.is_first_turn = false;
                futures::stream::iter(vec![label.to_string(), query])
            }
            .flatten_stream()
            .boxed()
        }

        fn protocol(&self) -> &'static str {
            "echo"
        }
    }

    async fn app_with(config: AppConfig, with_collection: bool) -> Router {
        let store = Arc::new(InMemoryVectorStore::new());
        if with_collection {
            store.create_collection(&config.index.collection_name).await.unwrap();
        }

        create_router(AppState {
            sessions: SessionStore::new(config.session_ttl()),
            config: Arc::new(config),
            engine: Arc::new(EchoEngine),
            reader: VectorIndexReader::new(store),
            session_header: HeaderName::from_static("x-session-id"),
        })
    }

    async fn app() -> Router {
        app_with(AppConfig::default(), true).await
    }

    fn chat_request(body: serde_json::Value, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header("x-session-id", session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"healthy\""));
    }

    #[tokio::test]
    async fn test_ready_reports_index() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["protocol"], "echo");
        assert_eq!(body["checks"]["vector_index"]["records"], 0);
    }

    #[tokio::test]
    async fn test_not_ready_without_collection() {
        let response = app_with(AppConfig::default(), false)
            .await
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_chat_streams_events() {
        let response = app()
            .await
            .oneshot(chat_request(serde_json::json!({"query": "Hei"}), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        let session = response.headers()["x-session-id"].to_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&session).is_ok());

        let body = body_text(response).await;
        assert!(body.contains("data: first\n\n"));
        assert!(body.contains("data: Hei\n\n"));
        assert!(body.find("first").unwrap() < body.find("Hei").unwrap());
    }

    #[tokio::test]
    async fn test_session_header_continues_conversation() {
        let app = app().await;

        let first = app
            .clone()
            .oneshot(chat_request(serde_json::json!({"query": "En"}), Some("s-1")))
            .await
            .unwrap();
        assert_eq!(first.headers()["x-session-id"], "s-1");
        assert!(body_text(first).await.contains("data: first"));

        let second = app
            .clone()
            .oneshot(chat_request(serde_json::json!({"query": "To"}), Some("s-1")))
            .await
            .unwrap();
        assert!(body_text(second).await.contains("data: again"));

        let other = app
            .oneshot(chat_request(serde_json::json!({"query": "Tre"}), Some("s-2")))
            .await
            .unwrap();
        assert!(body_text(other).await.contains("data: first"));
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let app = app().await;

        for query in ["", "   "] {
            let response = app
                .clone()
                .oneshot(chat_request(serde_json::json!({"query": query}), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_overlong_query_rejected() {
        let mut config = AppConfig::default();
        config.server.max_query_chars = 10;

        let response = app_with(config, true)
            .await
            .oneshot(chat_request(serde_json::json!({"query": "a".repeat(11)}), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_rate_limited_chat() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = app_with(config, true).await;

        let ok = app
            .clone()
            .oneshot(chat_request(serde_json::json!({"query": "En"}), None))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let limited = app
            .clone()
            .oneshot(chat_request(serde_json::json!({"query": "To"}), None))
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        // Probes are not limited
        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
