//! Prometheus metrics for the request pipeline and the database connection.
//!
//! This module provides:
//! - HTTP request counts and latency by status
//! - CORS and maintenance rejections
//! - Database connect latency, attempts and heartbeat failures
//! - Fault counts by kind

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info};

use crate::database::ConnectionState;
use crate::error::AppError;
use crate::faults::FaultKind;

// === Metric Name Constants ===

/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// HTTP requests counter metric name.
pub const METRIC_HTTP_REQUESTS: &str = "http_requests_total";
/// CORS rejections counter metric name.
pub const METRIC_CORS_BLOCKED: &str = "cors_blocked_total";
/// Maintenance rejections counter metric name.
pub const METRIC_MAINTENANCE_REJECTED: &str = "maintenance_rejected_total";
/// Rejected request bodies counter metric name.
pub const METRIC_BODY_REJECTED: &str = "body_rejected_total";
/// Database connect latency metric name.
pub const METRIC_DB_CONNECT_LATENCY: &str = "db_connect_latency_ms";
/// Database connect attempts counter metric name.
pub const METRIC_DB_CONNECT_ATTEMPTS: &str = "db_connect_attempts_total";
/// Database heartbeat failures counter metric name.
pub const METRIC_DB_HEARTBEAT_FAILURES: &str = "db_heartbeat_failures_total";
/// Database connection state gauge metric name.
pub const METRIC_DB_STATE: &str = "db_connection_state";
/// Faults counter metric name.
pub const METRIC_FAULTS: &str = "faults_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "HTTP request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_DB_CONNECT_LATENCY,
        "Time to establish the database connection in milliseconds"
    );

    describe_counter!(METRIC_HTTP_REQUESTS, "Total number of HTTP requests served");
    describe_counter!(
        METRIC_CORS_BLOCKED,
        "Total number of requests refused by the origin policy"
    );
    describe_counter!(
        METRIC_MAINTENANCE_REJECTED,
        "Total number of requests refused during maintenance"
    );
    describe_counter!(
        METRIC_BODY_REJECTED,
        "Total number of request bodies rejected as oversized or malformed"
    );
    describe_counter!(
        METRIC_DB_CONNECT_ATTEMPTS,
        "Total number of database connection attempts"
    );
    describe_counter!(
        METRIC_DB_HEARTBEAT_FAILURES,
        "Total number of failed database heartbeat pings"
    );
    describe_counter!(METRIC_FAULTS, "Total number of unhandled faults by kind");

    describe_gauge!(
        METRIC_DB_STATE,
        "Database connection state (0=disconnected, 1=connected, 2=connecting, 3=disconnecting)"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn install_exporter(addr: SocketAddr) -> Result<(), AppError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one served HTTP request.
pub fn record_http_request(status: u16, latency: Duration) {
    let latency_ms = latency.as_secs_f64() * 1000.0;
    let status = status.to_string();
    counter!(METRIC_HTTP_REQUESTS, "status" => status.clone()).increment(1);
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "status" => status).record(latency_ms);
}

/// Increment CORS rejections counter.
pub fn inc_cors_blocked() {
    counter!(METRIC_CORS_BLOCKED).increment(1);
}

/// Increment maintenance rejections counter.
pub fn inc_maintenance_rejected() {
    counter!(METRIC_MAINTENANCE_REJECTED).increment(1);
}

/// Increment rejected bodies counter.
pub fn inc_body_rejected(reason: &'static str) {
    counter!(METRIC_BODY_REJECTED, "reason" => reason).increment(1);
}

/// Increment database connect attempts counter.
pub fn inc_db_connect_attempts() {
    counter!(METRIC_DB_CONNECT_ATTEMPTS).increment(1);
}

/// Increment database heartbeat failures counter.
pub fn inc_db_heartbeat_failures() {
    counter!(METRIC_DB_HEARTBEAT_FAILURES).increment(1);
}

/// Publish the current database connection state.
pub fn set_db_state(state: ConnectionState) {
    gauge!(METRIC_DB_STATE).set(f64::from(state.code()));
}

/// Increment faults counter.
pub fn inc_faults(kind: FaultKind) {
    counter!(METRIC_FAULTS, "kind" => kind.to_string()).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for the database connection.
pub fn timer_db_connect() -> LatencyTimer {
    LatencyTimer::new(METRIC_DB_CONNECT_LATENCY)
}
