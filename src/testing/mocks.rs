//! Mock implementations for testing
//!
//! An in-process channel transport pair drives the full client state machine
//! without sockets, and a scripted connector simulates dial failures for
//! reconnect testing. Used by unit and integration tests alike.

use crate::protocol::{AlertEvent, ClientFrame, ServerFrame};
use crate::server::OfflineNotifier;
use crate::transport::{Connector, FeedTransport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

const MOCK_QUEUE_DEPTH: usize = 64;

/// What the far end observes from the client
#[derive(Debug)]
pub enum ClientEvent {
    Frame(ClientFrame),
    Closed,
}

/// In-process transport: the client half of a channel pair
pub struct ChannelTransport {
    to_server: mpsc::Sender<ClientEvent>,
    from_server: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl FeedTransport for ChannelTransport {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        self.to_server
            .send(ClientEvent::Frame(frame.clone()))
            .await
            .map_err(|_| TransportError::WriteFailed("server end dropped".to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        match self.from_server.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                graceful: false,
                reason: "server end dropped".to_string(),
            },
        }
    }

    async fn close(&mut self) {
        let _ = self.to_server.send(ClientEvent::Closed).await;
    }
}

/// The server half of a channel transport pair
pub struct ServerEnd {
    to_client: mpsc::Sender<TransportEvent>,
    from_client: mpsc::Receiver<ClientEvent>,
}

impl ServerEnd {
    /// Queue a frame for the client; false when the client is gone
    pub async fn send_frame(&self, frame: ServerFrame) -> bool {
        self.to_client
            .send(TransportEvent::Frame(frame))
            .await
            .is_ok()
    }

    /// Complete the handshake with a connection ack
    pub async fn send_ack(&self) -> bool {
        self.send_frame(ServerFrame::connection_ack(uuid::Uuid::new_v4(), 30))
            .await
    }

    /// Close the connection; `graceful` selects the manual-disconnect close
    /// reason versus an abnormal failure
    pub async fn close(&self, graceful: bool, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                graceful,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }
}

/// Create a connected transport pair
pub fn channel_transport() -> (ChannelTransport, ServerEnd) {
    let (to_server, from_client) = mpsc::channel(MOCK_QUEUE_DEPTH);
    let (to_client, from_server) = mpsc::channel(MOCK_QUEUE_DEPTH);
    (
        ChannelTransport {
            to_server,
            from_server,
        },
        ServerEnd {
            to_client,
            from_client,
        },
    )
}

/// Scripted outcome for one dial attempt
#[derive(Debug, Clone)]
pub enum DialOutcome {
    Accept,
    Refuse(String),
}

/// Connector with a scripted failure sequence; once the script is exhausted
/// every dial is accepted
pub struct MockConnector {
    script: Mutex<VecDeque<DialOutcome>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    attempt_times: Mutex<Vec<Instant>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl MockConnector {
    /// Returns the connector plus a stream of server ends, one per accepted
    /// dial
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::with_script(Vec::new())
    }

    pub fn with_script(
        script: Vec<DialOutcome>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(script.into()),
                accepted,
                attempt_times: Mutex::new(Vec::new()),
                tokens_seen: Mutex::new(Vec::new()),
            }),
            accepted_rx,
        )
    }

    /// Dial attempt timestamps, for asserting backoff schedules under paused
    /// time
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.lock(&self.attempt_times).clone()
    }

    pub fn attempts(&self) -> usize {
        self.lock(&self.attempt_times).len()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.lock(&self.tokens_seen).clone()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for Arc<MockConnector> {
    type Transport = ChannelTransport;

    async fn connect(&self, token: &str) -> Result<ChannelTransport, TransportError> {
        self.lock(&self.attempt_times).push(Instant::now());
        self.lock(&self.tokens_seen).push(token.to_string());

        let outcome = self
            .lock(&self.script)
            .pop_front()
            .unwrap_or(DialOutcome::Accept);
        match outcome {
            DialOutcome::Accept => {
                let (transport, server_end) = channel_transport();
                let _ = self.accepted.send(server_end);
                Ok(transport)
            }
            DialOutcome::Refuse(reason) => Err(TransportError::ConnectFailed(reason)),
        }
    }
}

/// Offline notifier that records every hand-off
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<AlertEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OfflineNotifier for RecordingNotifier {
    async fn notify(&self, _subscriber_id: &str, event: &AlertEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
