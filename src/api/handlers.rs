//! HTTP API handlers.

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, State},
    http::Method,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::config::Config;
use crate::database::{ConnectionStatus, Database};
use crate::error::ApiError;
use crate::policy::{MaintenanceGate, OriginPolicy};

/// Plain-text body served on `/`.
pub const LIVENESS_MESSAGE: &str = "APV API is running";

/// Application state shared with middleware, handlers and route groups.
///
/// Constructed once at startup and passed in; nothing here is global.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Cross-origin admission policy.
    pub origins: Arc<OriginPolicy>,
    /// Maintenance-mode gate.
    pub maintenance: MaintenanceGate,
    /// Maximum accepted JSON body in bytes.
    pub body_limit: usize,
    /// Database handle shared by all route groups.
    pub db: Database,
}

impl AppState {
    /// Create new app state.
    pub fn new(
        origins: OriginPolicy,
        maintenance: MaintenanceGate,
        body_limit: usize,
        db: Database,
    ) -> Self {
        Self {
            origins: Arc::new(origins),
            maintenance,
            body_limit,
            db,
        }
    }

    /// Build state from configuration and an established database handle.
    pub fn from_config(config: &Config, db: Database) -> Self {
        Self::new(
            config.origin_policy(),
            config.maintenance_gate(),
            config.body_limit_bytes,
            db,
        )
    }

    /// Live database connection status.
    pub fn connection(&self) -> &ConnectionStatus {
        self.db.status()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// The process is up and serving.
    pub ok: bool,
    /// Database ready-state code.
    pub mongo: u8,
}

/// Liveness handler - plain text.
pub async fn root() -> &'static str {
    LIVENESS_MESSAGE
}

/// Health check handler - always 200, reports the current connection state.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        mongo: state.connection().get().code(),
    })
}

/// Fallback for unmatched paths and methods.
pub async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::RouteNotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ConnectionState;
    use axum::http::Uri;

    fn state() -> AppState {
        let status = ConnectionStatus::new(ConnectionState::Connected);
        AppState::new(
            OriginPolicy::default(),
            MaintenanceGate::default(),
            1024,
            Database::detached(status, "test"),
        )
    }

    #[test]
    fn app_state_shares_connection_status() {
        let state = state();
        let clone = state.clone();
        assert!(clone.connection().is_connected());

        state.connection().set(ConnectionState::Disconnected);
        assert!(!clone.connection().is_connected());
    }

    #[tokio::test]
    async fn not_found_names_method_and_path() {
        let err = not_found(Method::DELETE, OriginalUri(Uri::from_static("/api/nothing?x=1"))).await;
        assert_eq!(err.to_string(), "Not found: DELETE /api/nothing");
    }
}
