//! Database collaborator.
//!
//! This module handles:
//! - Connection state shared with the health endpoint
//! - Connecting to MongoDB with bounded timeouts
//! - Optional bounded retry of the initial connection
//! - A heartbeat that keeps the connection state current and reports a fault
//!   when the server stays unreachable

pub mod mongo;
pub mod state;

use std::time::Duration;

use tracing::{info, warn};
use url::Url;

pub use mongo::{Connector, Database, MongoConnector};
pub use state::{ConnectionState, ConnectionStatus};

use crate::config::Config;
use crate::error::{AppError, DatabaseError};
use crate::metrics;

/// Placeholder when the connection string has no parseable host.
pub const UNKNOWN_HOST: &str = "(unknown host)";

/// Everything a [`Connector`] needs for one attempt.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Connection string.
    pub uri: String,
    /// How long to wait for a suitable server.
    pub server_selection_timeout: Duration,
    /// Idle timeout for pooled sockets.
    pub socket_timeout: Duration,
    /// Application name reported to the server.
    pub app_name: String,
}

impl ConnectSettings {
    /// Build from configuration; fails when `MONGO_URI` is missing.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            uri: config.mongo_uri()?.to_string(),
            server_selection_timeout: config.server_selection_timeout(),
            socket_timeout: config.socket_timeout(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
        })
    }

    /// Host portion of the URI, for logs.
    pub fn host(&self) -> String {
        host_from_uri(&self.uri)
    }
}

/// Extract `host[:port]` from a connection string without exposing credentials.
///
/// Multi-host seed lists and unparseable strings yield [`UNKNOWN_HOST`].
pub fn host_from_uri(uri: &str) -> String {
    Url::parse(uri)
        .ok()
        .and_then(|url| {
            let host = url.host_str()?.to_string();
            Some(match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            })
        })
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

/// Backoff schedule for the initial connection.
#[derive(Debug, Clone)]
pub struct ConnectRetry {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            retries: 0,
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
        }
    }
}

impl ConnectRetry {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.db_connect_retries,
            initial_delay_ms: config.db_retry_delay_ms,
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Schedule and failure budget for the connection heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Time between pings.
    pub interval: Duration,
    /// Budget for a single ping.
    pub timeout: Duration,
    /// Consecutive failed pings before the heartbeat reports a fault; 0 never gives up.
    pub max_failures: u32,
}

impl HeartbeatSettings {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            timeout: config.server_selection_timeout(),
            max_failures: config.db_heartbeat_max_failures,
        }
    }
}

/// Connect, retrying per `retry`. The status reads `Connecting` throughout and
/// `Disconnected` if every attempt fails.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    settings: &ConnectSettings,
    status: &ConnectionStatus,
    retry: &ConnectRetry,
) -> Result<Database, DatabaseError> {
    let host = settings.host();
    let mut attempt = 0;

    loop {
        status.set(ConnectionState::Connecting);
        metrics::inc_db_connect_attempts();
        let timer = metrics::timer_db_connect();

        match connector.connect(settings, status.clone()).await {
            Ok(db) => {
                info!(host = %host, elapsed_ms = timer.elapsed_ms() as u64, "Database connected");
                return Ok(db);
            }
            Err(e) if attempt < retry.retries => {
                let delay = retry.next_delay(attempt);
                attempt += 1;
                warn!(
                    host = %host,
                    attempt,
                    retries = retry.retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Database connection failed, retrying"
                );
                status.set(ConnectionState::Disconnected);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                status.set(ConnectionState::Disconnected);
                return Err(e);
            }
        }
    }
}
