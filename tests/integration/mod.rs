//! Integration tests for the APV backend startup sequence.
//!
//! Most tests use an in-process connector and bind an ephemeral port.
//! The MongoDB test requires a reachable server in MONGO_URI.
//! Run with: cargo test --test integration -- --ignored

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use apv_backend::config::Config;
use apv_backend::database::{
    ConnectSettings, ConnectionState, ConnectionStatus, Connector, Database, MongoConnector,
};
use apv_backend::error::{AppError, DatabaseError};
use apv_backend::faults;
use apv_backend::Bootstrap;
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

/// Connector that never touches the network.
#[derive(Clone)]
struct FakeConnector {
    calls: Arc<AtomicU32>,
    fail: bool,
}

impl FakeConnector {
    fn healthy() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            fail: false,
        }
    }

    fn unreachable() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            fail: true,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    async fn connect(
        &self,
        settings: &ConnectSettings,
        status: ConnectionStatus,
    ) -> Result<Database, DatabaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DatabaseError::Unavailable("connection refused".into()));
        }
        status.set(ConnectionState::Connected);
        Ok(Database::detached(status, settings.host()))
    }
}

/// Ephemeral port and a fake URI, overridden by `pairs`; an empty value unsets.
fn config(pairs: &[(&str, &str)]) -> Config {
    let mut env: HashMap<&str, &str> = HashMap::from([
        ("PORT", "0"),
        ("MONGO_URI", "mongodb://fake.local:27017/apv"),
    ]);
    env.extend(pairs.iter().copied());
    env.retain(|_, v| !v.is_empty());
    Config::from_pairs(env).unwrap()
}

struct Server {
    base: String,
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), AppError>>,
}

impl Server {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(config: Config) -> Server {
    let running = Bootstrap::new(config, FakeConnector::healthy())
        .without_panic_hook()
        .start()
        .await
        .unwrap();

    let base = format!("http://127.0.0.1:{}", running.local_addr().port());
    let (stop, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(running.serve(async move {
        let _ = rx.await;
    }));

    Server { base, stop, handle }
}

#[tokio::test]
async fn missing_mongo_uri_fails_before_connecting() {
    let connector = FakeConnector::healthy();
    let config = config(&[("MONGO_URI", "")]);

    let result = Bootstrap::new(config, connector.clone())
        .without_panic_hook()
        .start()
        .await;

    assert!(matches!(result, Err(AppError::ConfigMissing("MONGO_URI"))));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn blank_mongo_uri_is_treated_as_missing() {
    let connector = FakeConnector::healthy();
    let config = config(&[("MONGO_URI", "   ")]);

    let result = Bootstrap::new(config, connector.clone())
        .without_panic_hook()
        .start()
        .await;

    assert!(matches!(result, Err(AppError::ConfigMissing(_))));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn failed_connection_is_fatal() {
    let connector = FakeConnector::unreachable();

    let result = Bootstrap::new(config(&[]), connector.clone())
        .without_panic_hook()
        .start()
        .await;

    assert!(matches!(result, Err(AppError::DbConnectFailed(_))));
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn configured_retries_are_attempted() {
    let connector = FakeConnector::unreachable();
    let config = config(&[("DB_CONNECT_RETRIES", "2"), ("DB_RETRY_DELAY_MS", "1")]);

    let result = Bootstrap::new(config, connector.clone())
        .without_panic_hook()
        .start()
        .await;

    assert!(matches!(result, Err(AppError::DbConnectFailed(_))));
    assert_eq!(connector.calls(), 3);
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn metrics_port_stays_unbound_when_startup_fails() {
    let metrics_port = free_port();
    let metrics_port_str = metrics_port.to_string();

    for (connector, mongo_uri) in [
        (FakeConnector::healthy(), ""),
        (FakeConnector::unreachable(), "mongodb://fake.local:27017/apv"),
    ] {
        let config = config(&[("MONGO_URI", mongo_uri), ("METRICS_PORT", &metrics_port_str)]);

        let result = Bootstrap::new(config, connector)
            .without_panic_hook()
            .start()
            .await;

        assert!(result.is_err());
        std::net::TcpListener::bind(("0.0.0.0", metrics_port))
            .expect("metrics port must still be free");
    }
}

#[tokio::test]
async fn panic_hook_is_not_installed_when_startup_fails() {
    let result = Bootstrap::new(config(&[]), FakeConnector::unreachable())
        .start()
        .await;

    assert!(matches!(result, Err(AppError::DbConnectFailed(_))));
    assert!(!faults::panic_hook_installed());
}

#[tokio::test]
async fn serves_health_and_liveness_once_connected() {
    let server = start(config(&[])).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/healthz", server.base)).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = health.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "ok": true, "mongo": 1 }));

    let root = client.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(root.text().await.unwrap(), "APV API is running");

    server.stop().await;
}

#[tokio::test]
async fn maintenance_and_origin_policy_apply_over_the_wire() {
    let server = start(config(&[
        ("MAINTENANCE", "true"),
        ("CORS_ORIGIN", "https://apv.example.com"),
    ]))
    .await;
    let client = reqwest::Client::new();

    let root = client.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(root.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let health = client
        .get(format!("{}/healthz", server.base))
        .header("Origin", "https://apv.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(
        health
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://apv.example.com")
    );

    let blocked = client
        .get(format!("{}/healthz", server.base))
        .header("Origin", "https://elsewhere.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(blocked.status(), reqwest::StatusCode::FORBIDDEN);
    let body: serde_json::Value = blocked.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({ "message": "CORS blocked: https://elsewhere.example.com" })
    );

    server.stop().await;
}

#[tokio::test]
#[ignore = "requires a reachable MongoDB in MONGO_URI"]
async fn connects_to_real_mongodb() {
    dotenvy::dotenv().ok();
    let Ok(uri) = std::env::var("MONGO_URI") else {
        eprintln!("MONGO_URI not set, skipping");
        return;
    };

    let config = config(&[("MONGO_URI", uri.as_str())]);
    let running = Bootstrap::new(config, MongoConnector)
        .without_panic_hook()
        .start()
        .await
        .unwrap();

    assert!(running.state().connection().is_connected());
    assert!(running.state().db.client().is_some());

    running.serve(async {}).await.unwrap();
}
