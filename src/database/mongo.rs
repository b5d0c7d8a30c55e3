//! MongoDB connector and heartbeat.

use std::future::Future;
use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use super::state::{ConnectionState, ConnectionStatus};
use super::{host_from_uri, ConnectSettings, HeartbeatSettings};
use crate::error::DatabaseError;
use crate::faults::{self, FaultPolicy};
use crate::metrics;

/// Opens database connections. Bootstrap is generic over this so tests can
/// substitute a connector that never touches the network.
pub trait Connector: Send + Sync {
    /// Establish a verified connection, reporting progress through `status`.
    fn connect(
        &self,
        settings: &ConnectSettings,
        status: ConnectionStatus,
    ) -> impl Future<Output = Result<Database, DatabaseError>> + Send;
}

/// Handle to the process-wide database connection.
///
/// Cheap to clone; all clones share the driver pool and the status.
#[derive(Debug, Clone)]
pub struct Database {
    client: Option<Client>,
    status: ConnectionStatus,
    host: String,
}

impl Database {
    /// Wrap a connected driver client.
    pub fn connected(client: Client, status: ConnectionStatus, host: impl Into<String>) -> Self {
        status.set(ConnectionState::Connected);
        Self {
            client: Some(client),
            status,
            host: host.into(),
        }
    }

    /// A handle with no driver behind it; its status is whatever the owner sets.
    pub fn detached(status: ConnectionStatus, host: impl Into<String>) -> Self {
        Self {
            client: None,
            status,
            host: host.into(),
        }
    }

    /// The driver client, when one exists.
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Shared connection status.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Host the connection targets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Start the heartbeat that keeps [`ConnectionStatus`] current.
    ///
    /// Returns `None` for detached handles.
    pub fn spawn_heartbeat(
        &self,
        settings: HeartbeatSettings,
        policy: FaultPolicy,
    ) -> Option<AbortHandle> {
        let client = self.client.clone()?;
        let status = self.status.clone();
        let host = self.host.clone();
        let ping_host = host.clone();
        let timeout = settings.timeout;

        Some(faults::spawn_observed(
            "db-heartbeat",
            policy,
            heartbeat(
                move || ping_within(client.clone(), ping_host.clone(), timeout),
                status,
                host,
                settings,
            ),
        ))
    }

    /// Mark the connection as closing and release the driver pool.
    pub async fn shutdown(self) {
        self.status.set(ConnectionState::Disconnecting);
        if let Some(client) = self.client {
            client.shutdown().await;
        }
        self.status.set(ConnectionState::Disconnected);
        info!(host = %self.host, "Database connection closed");
    }
}

/// Connector backed by the official MongoDB driver.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector;

impl Connector for MongoConnector {
    #[instrument(skip_all, fields(host = %host_from_uri(&settings.uri)))]
    async fn connect(
        &self,
        settings: &ConnectSettings,
        status: ConnectionStatus,
    ) -> Result<Database, DatabaseError> {
        let host = host_from_uri(&settings.uri);

        let mut options = ClientOptions::parse(settings.uri.as_str()).await?;
        options.server_selection_timeout = Some(settings.server_selection_timeout);
        options.max_idle_time = Some(settings.socket_timeout);
        options.app_name = Some(settings.app_name.clone());

        let client = Client::with_options(options)?;

        // The driver connects lazily; a ping forces server selection.
        let budget = settings.server_selection_timeout + Duration::from_secs(1);
        match tokio::time::timeout(budget, ping(&client)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(DatabaseError::Timeout {
                    host,
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        }

        debug!("Ping succeeded");
        Ok(Database::connected(client, status, host))
    }
}

async fn ping(client: &Client) -> Result<(), DatabaseError> {
    client.database("admin").run_command(doc! { "ping": 1 }).await?;
    Ok(())
}

async fn ping_within(client: Client, host: String, timeout: Duration) -> Result<(), DatabaseError> {
    match tokio::time::timeout(timeout, ping(&client)).await {
        Ok(result) => result,
        Err(_) => Err(DatabaseError::Timeout {
            host,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Ping on every tick and publish the result.
///
/// Returns an error once `max_failures` consecutive pings have failed; with
/// `max_failures == 0` it runs until aborted.
async fn heartbeat<P, Fut>(
    mut ping: P,
    status: ConnectionStatus,
    host: String,
    settings: HeartbeatSettings,
) -> Result<(), DatabaseError>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DatabaseError>>,
{
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; the connection was just verified.
    ticker.tick().await;

    let mut failures = 0u32;
    loop {
        ticker.tick().await;

        let next = match ping().await {
            Ok(()) => {
                failures = 0;
                ConnectionState::Connected
            }
            Err(e) => {
                failures += 1;
                metrics::inc_db_heartbeat_failures();
                warn!(host = %host, failures, error = %e, "Database heartbeat failed");
                ConnectionState::Disconnected
            }
        };

        let previous = status.set(next);
        if previous != next {
            info!(host = %host, from = %previous, to = %next, "Database connection state changed");
        }

        if settings.max_failures > 0 && failures >= settings.max_failures {
            return Err(DatabaseError::Unavailable(format!(
                "{} lost after {} consecutive failed heartbeats",
                host, failures
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn settings(max_failures: u32) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(2),
            timeout: Duration::from_millis(50),
            max_failures,
        }
    }

    /// Ping answering from `script` (true = ping ok); past its end every ping fails.
    fn scripted(
        script: &'static [bool],
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<(), DatabaseError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let ok = script.get(n).copied().unwrap_or(false);
            std::future::ready(if ok {
                Ok(())
            } else {
                Err(DatabaseError::Unavailable("down".into()))
            })
        }
    }

    #[tokio::test]
    async fn heartbeat_gives_up_after_consecutive_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let status = ConnectionStatus::new(ConnectionState::Connected);

        let result = heartbeat(scripted(&[], calls.clone()), status.clone(), "db".into(), settings(3)).await;

        assert!(matches!(result, Err(DatabaseError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(status.get(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn successful_ping_resets_the_failure_streak() {
        let calls = Arc::new(AtomicU32::new(0));
        let status = ConnectionStatus::new(ConnectionState::Connected);

        let result = heartbeat(
            scripted(&[false, false, true, false], calls.clone()),
            status,
            "db".into(),
            settings(3),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn every_ping_result_is_published() {
        let status = ConnectionStatus::new(ConnectionState::Connected);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicU32::new(0));

        let observer = status.clone();
        let log = seen.clone();
        let mut scripted_ping = scripted(&[false, true], calls);
        let ping = move || {
            log.lock().unwrap().push(observer.get());
            scripted_ping()
        };

        let result = heartbeat(ping, status, "db".into(), settings(3)).await;

        assert!(result.is_err());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn unlimited_heartbeat_runs_until_aborted() {
        let calls = Arc::new(AtomicU32::new(0));
        let status = ConnectionStatus::new(ConnectionState::Connected);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            heartbeat(scripted(&[], calls.clone()), status.clone(), "db".into(), settings(0)),
        )
        .await;

        assert!(result.is_err(), "heartbeat must not return with max_failures = 0");
        assert!(calls.load(Ordering::SeqCst) > 3);
        assert_eq!(status.get(), ConnectionState::Disconnected);
    }
}
