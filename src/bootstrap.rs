//! Process startup: configuration, database, listener, serving.
//!
//! The listener and the metrics endpoint are bound only after the database
//! connection is verified; a missing `MONGO_URI` fails before the connector is
//! ever called. The panic hook is installed once serving.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use strum::Display;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::{create_router, AppState, RouteGroups};
use crate::config::Config;
use crate::database::{
    connect_with_retry, ConnectRetry, ConnectSettings, ConnectionStatus, Connector,
    HeartbeatSettings,
};
use crate::error::AppError;
use crate::faults::{self, FaultPolicy};
use crate::metrics;

/// Startup lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Nothing checked yet.
    Init,
    /// Configuration loaded and validated.
    ConfigLoaded,
    /// Waiting on the initial database connection.
    DbConnecting,
    /// Listener bound and accepting requests.
    Serving,
    /// Shut down or failed.
    Terminated,
}

/// Drives the process from configuration to a bound listener.
pub struct Bootstrap<C: Connector> {
    config: Config,
    connector: C,
    groups: RouteGroups,
    install_panic_hook: bool,
    phase: Phase,
}

impl<C: Connector> Bootstrap<C> {
    /// Create a bootstrap with no route groups mounted.
    pub fn new(config: Config, connector: C) -> Self {
        Self {
            config,
            connector,
            groups: RouteGroups::new(),
            install_panic_hook: true,
            phase: Phase::Init,
        }
    }

    /// Mount downstream route groups.
    pub fn with_routes(mut self, groups: RouteGroups) -> Self {
        self.groups = groups;
        self
    }

    /// Leave the process panic hook alone (for embedding and tests).
    pub fn without_panic_hook(mut self) -> Self {
        self.install_panic_hook = false;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        info!(from = %self.phase, to = %next, "Bootstrap phase");
        self.phase = next;
    }

    /// Validate configuration, connect to the database and bind the listener.
    ///
    /// Every error here is fatal; the caller is expected to exit nonzero.
    pub async fn start(mut self) -> Result<Running, AppError> {
        match self.prepare().await {
            Ok(running) => Ok(running),
            Err(e) => {
                error!(phase = %self.phase, error = %e, "Startup failed");
                self.advance(Phase::Terminated);
                Err(e)
            }
        }
    }

    async fn prepare(&mut self) -> Result<Running, AppError> {
        self.config.validate()?;
        let fault_policy = self.config.fault_policy()?;
        let settings = ConnectSettings::from_config(&self.config)?;
        self.advance(Phase::ConfigLoaded);

        info!(host = %settings.host(), "Connecting to database");
        self.advance(Phase::DbConnecting);

        let status = ConnectionStatus::default();
        let retry = ConnectRetry::from_config(&self.config);
        let db = connect_with_retry(&self.connector, &settings, &status, &retry).await?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        if let Some(metrics_port) = self.config.metrics_port {
            metrics::install_exporter(SocketAddr::from(([0, 0, 0, 0], metrics_port)))?;
        }
        metrics::init_metrics();

        let state = AppState::from_config(&self.config, db);
        let router = create_router(state.clone(), std::mem::take(&mut self.groups));
        self.advance(Phase::Serving);

        if self.install_panic_hook {
            faults::install_panic_hook(fault_policy);
        }

        let port = local_addr.port();
        info!(port, maintenance = state.maintenance.is_enabled(), "Server listening");
        info!("Health: http://localhost:{}/healthz", port);
        info!("API base: http://localhost:{}/api", port);

        Ok(Running {
            local_addr,
            listener,
            router,
            state,
            heartbeat: HeartbeatSettings::from_config(&self.config),
            fault_policy,
        })
    }
}

/// A bound, connected server that has not started accepting yet.
pub struct Running {
    local_addr: SocketAddr,
    listener: TcpListener,
    router: Router,
    state: AppState,
    heartbeat: HeartbeatSettings,
    fault_policy: FaultPolicy,
}

impl Running {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests and close
    /// the database connection.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let heartbeat = self.state.db.spawn_heartbeat(self.heartbeat, self.fault_policy);

        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.state.db.clone().shutdown().await;
        info!(phase = %Phase::Terminated, "Server stopped");

        served.map_err(AppError::from)
    }
}
