//! Connection state shared between the driver side and the health endpoint.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use strum::{Display, EnumString};

/// Database connectivity as reported to health checks.
///
/// The numeric codes are the ready-state values the health endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No usable connection.
    Disconnected,
    /// Connected and answering pings.
    Connected,
    /// Initial connection in progress.
    Connecting,
    /// Shutting the connection down.
    Disconnecting,
}

impl ConnectionState {
    /// Numeric ready-state code.
    pub fn code(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Disconnecting => 3,
        }
    }

    /// Inverse of [`ConnectionState::code`]; unknown codes read as disconnected.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Shared, lock-free view of the current [`ConnectionState`].
///
/// Clones observe the same value. Readers always see the latest write, so the
/// health endpoint never serves a stale state.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<AtomicU8>,
}

impl ConnectionStatus {
    /// Create a status starting at `initial`.
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.code())),
        }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_code(self.state.load(Ordering::SeqCst))
    }

    /// Replace the state, returning the previous one.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.state.swap(state.code(), Ordering::SeqCst);
        crate::metrics::set_db_state(state);
        ConnectionState::from_code(previous)
    }

    /// True when connected.
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
