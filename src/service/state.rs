use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::service::{DriverKind, ServiceName};

/// Connection lifecycle of one service. `is_active` and `is_connected` are
/// both derived from this, so a connected service is always active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Inactive,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Reconnecting | ConnectionState::Disconnected
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// The live upstream session a supervisor currently owns.
pub(crate) struct Connection {
    pub id: u64,
    pub token: CancellationToken,
}

/// Mutable state of one supervisor, guarded by a single mutex.
pub(crate) struct ServiceState {
    pub phase: ConnectionState,
    /// Bumped whenever an activation begins or ends; async results carrying
    /// an older value are discarded.
    pub generation: u64,
    /// Parent of every connection token for the current activation.
    pub activation: Option<CancellationToken>,
    pub connection: Option<Connection>,
    pub connection_seq: u64,
    /// A recovery connect is in flight.
    pub connect_pending: bool,
    pub reconnect_task: Option<JoinHandle<()>>,
    pub reconnect_attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            phase: ConnectionState::Inactive,
            generation: 0,
            activation: None,
            connection: None,
            connection_seq: 0,
            connect_pending: false,
            reconnect_task: None,
            reconnect_attempts: 0,
            started_at: None,
            last_error: None,
        }
    }

    /// True while an automatic reconnect loop is still running.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels and forgets the current connection, if any.
    pub fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.token.cancel();
        }
    }

    /// Token for a new connection under the current activation.
    pub fn next_connection(&mut self) -> Option<(u64, CancellationToken)> {
        let activation = self.activation.as_ref()?;
        self.connection_seq += 1;
        Some((self.connection_seq, activation.child_token()))
    }
}

/// Point-in-time view of one service, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    pub service: ServiceName,
    pub kind: DriverKind,
    pub state: ConnectionState,
    pub is_active: bool,
    pub is_connected: bool,
    pub is_healthy: bool,
    pub subscriber_count: usize,
    pub subscribed_symbols: Vec<String>,
    pub cached_symbols: usize,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub uptime_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of a successful `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
    AlreadyStarting,
    Recovered,
}

impl StartOutcome {
    pub fn message(&self, service: ServiceName) -> String {
        match self {
            StartOutcome::Started => format!("{} service started", service),
            StartOutcome::AlreadyActive => format!("{} service already active", service),
            StartOutcome::AlreadyStarting => format!("{} service already starting", service),
            StartOutcome::Recovered => format!("{} service recovered", service),
        }
    }
}

/// Outcome of a `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The service was still connecting; the start was abandoned.
    StartCancelled,
    NotActive,
}

impl StopOutcome {
    pub fn message(&self, service: ServiceName) -> String {
        match self {
            StopOutcome::Stopped => format!("{} service stopped", service),
            StopOutcome::StartCancelled => format!("{} service start cancelled", service),
            StopOutcome::NotActive => format!("{} service not active", service),
        }
    }
}
