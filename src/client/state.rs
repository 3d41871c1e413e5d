//! Pure connection state machine for the feed client
//!
//! State transitions are computed by a pure function over (state, event)
//! pairs so the whole lifecycle is testable without timers or sockets. The
//! supervisor task in [`super::feed`] owns the state and feeds events in;
//! no two transitions for one connection ever run concurrently.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Lifecycle state of one logical connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection requested yet
    Idle,
    /// Transport dial in progress
    Connecting,
    /// Transport established, waiting for the connection ack
    Authenticating,
    /// Authenticated and receiving
    Live,
    /// Transport open but heartbeats overdue
    Degraded,
    /// Waiting out the backoff delay before the next dial
    Reconnecting { attempt: u32 },
    /// Terminal
    Closed { reason: CloseReason },
}

/// Why a connection reached the terminal state
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Caller invoked disconnect
    ManualDisconnect,
    /// Server closed with the explicit manual-disconnect close reason
    ServerClosed,
    /// Credential rejected; retrying with a stale token cannot succeed
    AuthFailed(String),
    /// Handshake rejected for tier or capacity reasons
    Rejected(String),
    /// Reconnect policy exhausted its attempt budget
    RetriesExhausted(String),
}

/// Events that drive state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Caller invoked connect
    ConnectRequested,
    /// Transport dial succeeded
    TransportOpened,
    /// Connection ack received during the handshake
    AckReceived,
    /// Any frame arrived on a live/degraded connection
    FrameReceived,
    /// Credential rejected during the handshake
    AuthRejected(String),
    /// Handshake rejected for tier/capacity reasons
    HandshakeRejected(String),
    /// No heartbeat within one interval, transport still open
    HeartbeatOverdue,
    /// Failure scheduled for retry with the given attempt number
    ReconnectScheduled(u32),
    /// Backoff delay elapsed
    RetryDelayElapsed,
    /// Attempt budget exhausted
    RetriesExhausted(String),
    /// Server closed gracefully
    ServerClosed,
    /// Caller invoked disconnect
    DisconnectRequested,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed { .. })
    }

    /// Whether application payloads may be delivered and sends accepted
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Live)
    }

    /// Whether the underlying transport is currently open
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Live | ConnectionState::Degraded)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, ConnectionState::Reconnecting { .. })
    }
}

/// Compute the next state for an event (pure function)
///
/// Event/state combinations outside the defined machine leave the state
/// unchanged; the supervisor never fabricates them, but a stale timer firing
/// after a manual disconnect must not resurrect the connection.
pub fn next_state(current: &ConnectionState, event: ConnectionEvent) -> ConnectionState {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (current, event) {
        (S::Idle | S::Closed { .. }, E::ConnectRequested) => S::Connecting,

        (S::Connecting, E::TransportOpened) => S::Authenticating,

        (S::Authenticating, E::AckReceived) => S::Live,
        (S::Authenticating, E::AuthRejected(reason)) => S::Closed {
            reason: CloseReason::AuthFailed(reason),
        },
        (S::Authenticating, E::HandshakeRejected(reason)) => S::Closed {
            reason: CloseReason::Rejected(reason),
        },

        (S::Live, E::HeartbeatOverdue) => S::Degraded,
        (S::Live | S::Degraded, E::FrameReceived) => S::Live,

        (S::Connecting | S::Authenticating | S::Live | S::Degraded, E::ReconnectScheduled(n)) => {
            S::Reconnecting { attempt: n }
        }
        (S::Reconnecting { .. }, E::RetryDelayElapsed) => S::Connecting,
        (
            S::Connecting | S::Authenticating | S::Live | S::Degraded | S::Reconnecting { .. },
            E::RetriesExhausted(reason),
        ) => S::Closed {
            reason: CloseReason::RetriesExhausted(reason),
        },

        (current, E::ServerClosed) if !current.is_terminal() => S::Closed {
            reason: CloseReason::ServerClosed,
        },
        (current, E::DisconnectRequested) if !current.is_terminal() => S::Closed {
            reason: CloseReason::ManualDisconnect,
        },

        (current, _) => current.clone(),
    }
}

/// Log a state transition at a level matching its weight
pub fn log_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Authenticating, ConnectionState::Live) => {
            info!("Feed connection established");
        }
        (ConnectionState::Reconnecting { .. }, ConnectionState::Connecting) => {
            info!("Retrying feed connection");
        }
        (ConnectionState::Live, ConnectionState::Degraded) => {
            warn!("Heartbeat overdue, connection degraded");
        }
        (_, ConnectionState::Reconnecting { attempt }) => {
            warn!(attempt, "Feed connection lost, reconnect scheduled");
        }
        (_, ConnectionState::Closed { reason }) => match reason {
            CloseReason::ManualDisconnect | CloseReason::ServerClosed => {
                info!(?reason, "Feed connection closed");
            }
            _ => error!(?reason, "Feed connection closed"),
        },
        (from, to) => {
            info!(?from, ?to, "Feed connection state change");
        }
    }
}

/// Snapshot surfaced to status handlers on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    /// Consecutive failed attempts so far
    pub attempt: u32,
    pub last_connected: Option<DateTime<Utc>>,
    /// Last recorded error detail, kept through the terminal state for display
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn from_state(
        state: &ConnectionState,
        attempt: u32,
        last_connected: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Self {
        Self {
            connected: state.is_connected(),
            reconnecting: state.is_reconnecting(),
            attempt,
            last_connected,
            error,
        }
    }
}
