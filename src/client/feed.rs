//! The feed client: one owned instance per logical connection
//!
//! A supervisor task owns the connection state machine and serializes every
//! transition; the [`FeedClient`] handle is a thin command/observation surface
//! over it. There is no hidden shared instance: construct one client per
//! connection, and share the handle explicitly if sharing is wanted.

use super::handlers::{HandlerRegistry, Subscription};
use super::heartbeat::{HeartbeatMonitor, Liveness};
use super::reconnect::ReconnectPolicy;
use super::state::{
    log_transition, next_state, ConnectionEvent, ConnectionState, ConnectionStatus,
};
use crate::config::ClientSection;
use crate::protocol::{AlertBody, ClientFrame, ErrorCode, ServerPayload, Thresholds};
use crate::transport::{Connector, FeedTransport, TransportEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Connection options for a feed client
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Bearer token obtained from the authentication collaborator
    pub token: String,
    pub connect_timeout: Duration,
    pub heartbeat: HeartbeatMonitor,
    pub reconnect: ReconnectPolicy,
}

impl FeedOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatMonitor::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn from_config(section: &ClientSection, token: String) -> Self {
        Self {
            token,
            connect_timeout: section.connect_timeout(),
            heartbeat: HeartbeatMonitor::from_timeout(section.heartbeat_timeout()),
            reconnect: ReconnectPolicy::from_config(&section.reconnect),
        }
    }
}

enum Command {
    Connect,
    Disconnect,
    Send(ClientFrame),
}

/// Handle to one logical feed connection
pub struct FeedClient {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    status_rx: watch::Receiver<ConnectionStatus>,
    messages: HandlerRegistry<AlertBody>,
    statuses: HandlerRegistry<ConnectionStatus>,
}

impl FeedClient {
    /// Construct a client and spawn its supervisor task. Must be called from
    /// within a tokio runtime.
    pub fn new<C: Connector>(connector: C, options: FeedOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let initial_status = ConnectionStatus::from_state(&ConnectionState::Idle, 0, None, None);
        let (status_tx, status_rx) = watch::channel(initial_status);

        let messages = HandlerRegistry::new();
        let statuses = HandlerRegistry::new();

        let supervisor = Supervisor {
            connector: Arc::new(connector),
            options,
            commands: commands_rx,
            state: ConnectionState::Idle,
            state_tx,
            status_tx,
            messages: messages.clone(),
            statuses: statuses.clone(),
            attempt: 0,
            last_connected: None,
            last_error: None,
        };
        tokio::spawn(supervisor.run());

        Self {
            commands: commands_tx,
            state_rx,
            status_rx,
            messages,
            statuses,
        }
    }

    /// Request a connection. Idempotent: a no-op while already connecting,
    /// live, or waiting out a reconnect delay. From the terminal closed state
    /// this restarts the whole cycle (the caller refreshes the token first
    /// when the closure was an authentication failure).
    pub fn connect(&self) {
        if self.commands.try_send(Command::Connect).is_err() {
            warn!("Connect request dropped: client supervisor unavailable");
        }
    }

    /// Force the terminal closed state, cancelling any pending reconnect
    /// timer or heartbeat wait. Safe from any state; a no-op from idle or
    /// closed. Resolves once the connection is fully torn down.
    pub async fn disconnect(&self) {
        if self.commands.send(Command::Disconnect).await.is_err() {
            return;
        }
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|s| s.is_terminal() || *s == ConnectionState::Idle)
            .await;
    }

    /// Best-effort send. Frames are never queued client-side: when the
    /// connection is not live the frame is dropped with a logged warning.
    pub fn send(&self, frame: ClientFrame) {
        if !self.state_rx.borrow().is_live() {
            warn!("Dropping outbound frame: connection not live");
            return;
        }
        if self.commands.try_send(Command::Send(frame)).is_err() {
            warn!("Dropping outbound frame: command queue full");
        }
    }

    /// Push a threshold configuration update to the server
    pub fn update_thresholds(&self, thresholds: Thresholds) {
        self.send(ClientFrame::config_update(thresholds));
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the connection state satisfies the predicate; resolves
    /// immediately when it already does. Useful for awaiting `Live` after
    /// `connect()` without polling.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = self.state_rx.clone();
        let result = match rx.wait_for(|s| predicate(s)).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        result
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to classified alert/update payloads. Delivered only while
    /// live, in server send order.
    pub fn on_message(
        &self,
        handler: impl Fn(&AlertBody) + Send + Sync + 'static,
    ) -> Subscription<AlertBody> {
        self.messages.subscribe(handler)
    }

    /// Subscribe to connection status changes; fired on every transition
    pub fn on_status(
        &self,
        handler: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription<ConnectionStatus> {
        self.statuses.subscribe(handler)
    }
}

/// Owns the state machine; the only task that mutates connection state
struct Supervisor<C: Connector> {
    connector: Arc<C>,
    options: FeedOptions,
    commands: mpsc::Receiver<Command>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<ConnectionStatus>,
    messages: HandlerRegistry<AlertBody>,
    statuses: HandlerRegistry<ConnectionStatus>,
    attempt: u32,
    last_connected: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self) {
        loop {
            let keep_running = match self.state.clone() {
                ConnectionState::Idle | ConnectionState::Closed { .. } => self.run_idle().await,
                ConnectionState::Connecting => self.run_connecting().await,
                ConnectionState::Reconnecting { attempt } => self.run_reconnecting(attempt).await,
                // Authenticating/Live/Degraded are driven inside
                // run_connecting/run_session; reaching here means the
                // transport is gone
                other => {
                    warn!(state = ?other, "Supervisor state without transport, rescheduling");
                    self.fail("internal: lost transport".to_string());
                    true
                }
            };
            if !keep_running {
                break;
            }
        }
        debug!("Feed client supervisor stopped");
    }

    /// Wait for commands while no connection is wanted
    async fn run_idle(&mut self) -> bool {
        match self.commands.recv().await {
            Some(Command::Connect) => {
                self.attempt = 0;
                self.last_error = None;
                self.apply(ConnectionEvent::ConnectRequested);
                true
            }
            Some(Command::Disconnect) => true, // no-op from idle/closed
            Some(Command::Send(_)) => {
                warn!("Dropping outbound frame: connection not live");
                true
            }
            None => false,
        }
    }

    /// Dial the transport, then drive the handshake and the live session
    async fn run_connecting(&mut self) -> bool {
        // The dial future owns its inputs so it survives command handling
        // without restarting the attempt
        let connector = Arc::clone(&self.connector);
        let token = self.options.token.clone();
        let connect_timeout = self.options.connect_timeout;
        let dial = async move { timeout(connect_timeout, connector.connect(&token)).await };
        tokio::pin!(dial);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => {
                        self.apply(ConnectionEvent::DisconnectRequested);
                        return true;
                    }
                    Some(Command::Connect) => {} // idempotent: dial already in flight
                    Some(Command::Send(_)) => {
                        warn!("Dropping outbound frame: connection not live");
                    }
                    None => return false,
                },
                dialed = &mut dial => {
                    return match dialed {
                        Ok(Ok(transport)) => {
                            self.apply(ConnectionEvent::TransportOpened);
                            self.run_session(transport).await
                        }
                        Ok(Err(e)) => {
                            self.fail(e.to_string());
                            true
                        }
                        Err(_) => {
                            self.fail("connect timeout".to_string());
                            true
                        }
                    };
                },
            }
        }
    }

    /// Drive one established transport through handshake and live delivery
    async fn run_session(&mut self, mut transport: C::Transport) -> bool {
        match self.authenticate(&mut transport).await {
            SessionStep::Proceed => {}
            SessionStep::Done => return true,
            SessionStep::Shutdown => {
                transport.close().await;
                return false;
            }
        }

        let monitor = self.options.heartbeat;
        let mut last_frame = Instant::now();

        loop {
            let deadline = if self.state.is_live() {
                monitor.overdue_deadline(last_frame)
            } else {
                monitor.failure_deadline(last_frame)
            };

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if self.state.is_live() {
                            if let Err(e) = transport.send(&frame).await {
                                self.fail(e.to_string());
                                return true;
                            }
                        } else {
                            warn!("Dropping outbound frame: connection not live");
                        }
                    }
                    Some(Command::Disconnect) => {
                        transport.close().await;
                        self.apply(ConnectionEvent::DisconnectRequested);
                        return true;
                    }
                    Some(Command::Connect) => {} // idempotent while connected
                    None => {
                        transport.close().await;
                        return false;
                    }
                },
                event = transport.recv() => match event {
                    TransportEvent::Frame(frame) => {
                        last_frame = Instant::now();
                        if self.state == ConnectionState::Degraded {
                            self.apply(ConnectionEvent::FrameReceived);
                        }
                        match frame.payload {
                            ServerPayload::Heartbeat => {
                                if let Err(e) = transport.send(&ClientFrame::heartbeat_ack()).await {
                                    self.fail(e.to_string());
                                    return true;
                                }
                            }
                            ServerPayload::Alert(body) | ServerPayload::Update(body) => {
                                if self.state.is_live() {
                                    self.messages.emit(&body);
                                }
                            }
                            ServerPayload::Error(body) => {
                                warn!(code = ?body.code, message = %body.message, "Server error frame");
                                self.last_error = Some(body.message);
                            }
                            ServerPayload::ConnectionAck(_) => {
                                debug!("Ignoring duplicate connection ack");
                            }
                        }
                    }
                    TransportEvent::Closed { graceful: true, .. } => {
                        self.apply(ConnectionEvent::ServerClosed);
                        return true;
                    }
                    TransportEvent::Closed { graceful: false, reason } => {
                        self.fail(reason);
                        return true;
                    }
                },
                _ = sleep_until(deadline) => {
                    match monitor.assess(Instant::now() - last_frame) {
                        Liveness::Overdue => {
                            if self.state.is_live() {
                                self.apply(ConnectionEvent::HeartbeatOverdue);
                            }
                        }
                        Liveness::Failed => {
                            // Half-open socket: tear down without waiting for
                            // a transport close notification
                            self.fail("heartbeat timeout".to_string());
                            return true;
                        }
                        Liveness::Healthy => {}
                    }
                }
            }
        }
    }

    /// Wait for the connection ack that completes the handshake
    async fn authenticate(&mut self, transport: &mut C::Transport) -> SessionStep {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => {
                        transport.close().await;
                        self.apply(ConnectionEvent::DisconnectRequested);
                        return SessionStep::Done;
                    }
                    Some(Command::Connect) => {} // idempotent: handshake in flight
                    Some(Command::Send(_)) => {
                        warn!("Dropping outbound frame: connection not live");
                    }
                    None => return SessionStep::Shutdown,
                },
                event = timeout(self.options.connect_timeout, transport.recv()) => match event {
                    Ok(TransportEvent::Frame(frame)) => match frame.payload {
                        ServerPayload::ConnectionAck(ack) => {
                            info!(
                                connection_id = %ack.connection_id,
                                protocol_version = %ack.protocol_version,
                                "Feed connection confirmed"
                            );
                            self.attempt = 0;
                            self.last_connected = Some(Utc::now());
                            self.last_error = None;
                            self.apply(ConnectionEvent::AckReceived);
                            return SessionStep::Proceed;
                        }
                        ServerPayload::Error(body) => {
                            self.last_error = Some(body.message.clone());
                            let event = match body.code {
                                ErrorCode::AuthFailed => {
                                    ConnectionEvent::AuthRejected(body.message)
                                }
                                ErrorCode::TierNotEligible | ErrorCode::CapacityExceeded => {
                                    ConnectionEvent::HandshakeRejected(body.message)
                                }
                                _ => {
                                    warn!(code = ?body.code, "Unexpected error during handshake");
                                    continue;
                                }
                            };
                            self.apply(event);
                            return SessionStep::Done;
                        }
                        other => {
                            debug!(frame = ?other, "Ignoring frame before connection ack");
                        }
                    },
                    Ok(TransportEvent::Closed { graceful: true, .. }) => {
                        self.apply(ConnectionEvent::ServerClosed);
                        return SessionStep::Done;
                    }
                    Ok(TransportEvent::Closed { graceful: false, reason }) => {
                        self.fail(reason);
                        return SessionStep::Done;
                    }
                    Err(_) => {
                        self.fail("no connection ack within connect timeout".to_string());
                        return SessionStep::Done;
                    }
                },
            }
        }
    }

    /// Wait out the backoff delay, still responsive to disconnect
    async fn run_reconnecting(&mut self, attempt: u32) -> bool {
        let delay = self.options.reconnect.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => {
                        self.apply(ConnectionEvent::DisconnectRequested);
                        return true;
                    }
                    Some(Command::Connect) => {} // idempotent: retry already scheduled
                    Some(Command::Send(_)) => {
                        warn!("Dropping outbound frame: connection not live");
                    }
                    None => return false,
                },
                _ = sleep_until(deadline) => {
                    self.apply(ConnectionEvent::RetryDelayElapsed);
                    return true;
                }
            }
        }
    }

    /// Record a retryable failure and either schedule the next attempt or
    /// give up terminally
    fn fail(&mut self, reason: String) {
        self.last_error = Some(reason.clone());
        self.attempt += 1;
        if self.options.reconnect.is_exhausted(self.attempt) {
            self.apply(ConnectionEvent::RetriesExhausted(reason));
        } else {
            self.apply(ConnectionEvent::ReconnectScheduled(self.attempt));
        }
    }

    /// Apply an event to the state machine and surface the transition
    fn apply(&mut self, event: ConnectionEvent) {
        let new_state = next_state(&self.state, event);
        if new_state == self.state {
            return;
        }
        log_transition(&self.state, &new_state);
        self.state = new_state.clone();
        let _ = self.state_tx.send(new_state.clone());

        let status = ConnectionStatus::from_state(
            &new_state,
            self.attempt,
            self.last_connected,
            self.last_error.clone(),
        );
        let _ = self.status_tx.send(status.clone());
        self.statuses.emit(&status);
    }
}

enum SessionStep {
    /// Handshake complete, proceed to live delivery
    Proceed,
    /// Session over, supervisor continues from the new state
    Done,
    /// Handle dropped, supervisor should stop
    Shutdown,
}
