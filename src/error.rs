//! Unified error types for the backend.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Fatal errors raised while starting the process.
///
/// None of these are recoverable: `main` logs them and exits nonzero before a
/// listener is ever bound.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// A required configuration value is absent or empty.
    #[error("{0} is required but was not set")]
    ConfigMissing(&'static str),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The initial database connection could not be established.
    #[error("database connection failed: {0}")]
    DbConnectFailed(#[from] DatabaseError),

    /// The Prometheus exporter could not be installed.
    #[error("metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// IO error (listener bind, accept loop).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database driver errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error reported by the MongoDB driver.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// The server did not answer within the allotted time.
    #[error("no response from {host} within {timeout_ms}ms")]
    Timeout {
        /// Host the connection targeted.
        host: String,
        /// Elapsed budget in milliseconds.
        timeout_ms: u64,
    },

    /// Connection refused by a connector that cannot reach any server.
    #[error("{0}")]
    Unavailable(String),
}

/// Per-request errors, rendered as a JSON `{ "message": ... }` body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request origin is neither local nor allow-listed.
    #[error("CORS blocked: {origin}")]
    CorsBlocked {
        /// The offending `Origin` header value.
        origin: String,
    },

    /// Maintenance mode is on and the path is not exempt.
    #[error("Service temporarily unavailable")]
    MaintenanceActive,

    /// A JSON body that could not be decoded.
    #[error("Malformed JSON body: {0}")]
    MalformedBody(String),

    /// A body over the configured size limit.
    #[error("Request body too large")]
    PayloadTooLarge,

    /// No route matched.
    #[error("Not found: {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// A handler or middleware panicked.
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CorsBlocked { .. } => StatusCode::FORBIDDEN,
            ApiError::MaintenanceActive => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
