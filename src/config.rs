//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::faults::FaultPolicy;
use crate::policy::{AllowList, MaintenanceGate, OriginPolicy};

/// Value of `MAINTENANCE` that turns the gate on. Anything else leaves it off.
pub const MAINTENANCE_ENABLED: &str = "true";

/// Log filter used when verbose logging is requested.
pub const VERBOSE_LOG_FILTER: &str = "apv_backend=debug,tower_http=debug,info";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Server ===
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted JSON body in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Optional port for the Prometheus scrape endpoint.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    // === Database ===
    /// MongoDB connection string. Required.
    #[serde(default)]
    pub mongo_uri: Option<String>,

    /// Server selection timeout for the initial connection.
    #[serde(default = "default_server_selection_timeout")]
    pub db_server_selection_timeout_ms: u64,

    /// Idle timeout for pooled sockets.
    #[serde(default = "default_socket_timeout")]
    pub db_socket_timeout_ms: u64,

    /// Extra connection attempts after the first failure (0 = fail immediately).
    #[serde(default)]
    pub db_connect_retries: u32,

    /// Base delay between connection attempts, doubled per attempt.
    #[serde(default = "default_retry_delay")]
    pub db_retry_delay_ms: u64,

    /// Seconds between heartbeat pings once connected.
    #[serde(default = "default_heartbeat")]
    pub db_heartbeat_secs: u64,

    /// Consecutive failed heartbeats before the connection is reported lost (0 = never).
    #[serde(default = "default_heartbeat_max_failures")]
    pub db_heartbeat_max_failures: u32,

    // === Request policy ===
    /// Comma-separated allow-list of cross-origin callers.
    #[serde(default)]
    pub cors_origin: String,

    /// Maintenance flag; only the exact string `"true"` enables it.
    #[serde(default)]
    pub maintenance: Option<String>,

    // === Process ===
    /// What to do with faults nothing else handled: `log` or `exit`.
    #[serde(default = "default_fault_policy")]
    pub fault_policy: String,

    /// Log filter directives (`RUST_LOG` syntax).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging; overrides `rust_log`. Accepts `true/false`,
    /// `1/0`, `yes/no` and `on/off` in any case.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub verbose: bool,
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean flag, got {other:?}"
        ))),
    }
}

fn default_port() -> u16 {
    5000
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_server_selection_timeout() -> u64 {
    5_000
}

fn default_socket_timeout() -> u64 {
    20_000
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_heartbeat() -> u64 {
    10
}

fn default_heartbeat_max_failures() -> u32 {
    6
}

fn default_fault_policy() -> String {
    "log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build configuration from explicit key/value pairs (upper-case keys).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), AppError> {
        self.mongo_uri()?;

        if self.body_limit_bytes == 0 {
            return Err(AppError::InvalidConfig(
                "BODY_LIMIT_BYTES must be greater than 0".to_string(),
            ));
        }

        if self.db_server_selection_timeout_ms == 0 {
            return Err(AppError::InvalidConfig(
                "DB_SERVER_SELECTION_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.db_heartbeat_secs == 0 {
            return Err(AppError::InvalidConfig(
                "DB_HEARTBEAT_SECS must be greater than 0".to_string(),
            ));
        }

        self.fault_policy()?;
        Ok(())
    }

    /// The database connection string, or `ConfigMissing` when absent or empty.
    pub fn mongo_uri(&self) -> Result<&str, AppError> {
        match self.mongo_uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(AppError::ConfigMissing("MONGO_URI")),
        }
    }

    /// True only for `MAINTENANCE=true`.
    pub fn maintenance_enabled(&self) -> bool {
        self.maintenance.as_deref() == Some(MAINTENANCE_ENABLED)
    }

    /// Parsed fault policy.
    pub fn fault_policy(&self) -> Result<FaultPolicy, AppError> {
        FaultPolicy::from_str(self.fault_policy.trim()).map_err(|_| {
            AppError::InvalidConfig(format!(
                "FAULT_POLICY must be 'log' or 'exit', got '{}'",
                self.fault_policy
            ))
        })
    }

    /// Allow-list parsed from `CORS_ORIGIN`.
    pub fn allow_list(&self) -> AllowList {
        AllowList::parse(&self.cors_origin)
    }

    /// Origin policy built from the allow-list.
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(self.allow_list())
    }

    /// Maintenance gate built from the flag.
    pub fn maintenance_gate(&self) -> MaintenanceGate {
        MaintenanceGate::new(self.maintenance_enabled())
    }

    /// Server selection timeout.
    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_server_selection_timeout_ms)
    }

    /// Pooled socket idle timeout.
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.db_socket_timeout_ms)
    }

    /// Log filter directives; `cli_verbose` or `VERBOSE=true` select [`VERBOSE_LOG_FILTER`].
    pub fn log_filter(&self, cli_verbose: bool) -> &str {
        if cli_verbose || self.verbose {
            VERBOSE_LOG_FILTER
        } else {
            &self.rust_log
        }
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.db_heartbeat_secs)
    }
}
