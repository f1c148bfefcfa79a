//! Error types for Ragline services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Classification of transient service failures
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    VectorStoreError,

    // External service errors (8xxx)
    UpstreamError,
    ParseError,
    TerminalRun,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::VectorStoreError => 7001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::ParseError => 8002,
            ErrorCode::TerminalRun => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // External service errors
    #[error("{service} service error: {message}")]
    TransientApi { service: String, message: String },

    #[error("Unexpected response shape: {message}")]
    Parse { message: String },

    #[error("Assistant run {status}")]
    TerminalRun { status: String },

    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Shorthand for a failed call to a remote service
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::TransientApi {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a malformed service response
    pub fn parse(message: impl Into<String>) -> Self {
        AppError::Parse {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration failure
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::TransientApi { .. } => ErrorCode::UpstreamError,
            AppError::Parse { .. } => ErrorCode::ParseError,
            AppError::TerminalRun { .. } => ErrorCode::TerminalRun,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. } | AppError::Configuration { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 502 Bad Gateway
            AppError::TransientApi { .. } | AppError::Parse { .. } | AppError::TerminalRun { .. } => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::VectorStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Failures of a remote call that a caller may retry.
    ///
    /// Malformed responses count as transient: for the caller they are
    /// indistinguishable from a flaky upstream.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientApi { .. } | AppError::Parse { .. })
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Render the error as the single terminal piece of an answer stream
    pub fn to_stream_token(&self) -> String {
        match self {
            AppError::TerminalRun { status } => {
                format!("Error: Assistant run {}. Please try again.", status)
            }
            other => format!("Error: {}", other),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
