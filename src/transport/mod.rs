//! Transport layer for feed connections
//!
//! This module provides the transport abstraction the client state machine is
//! written against, plus the WebSocket implementation. The abstraction exists
//! for dependency injection: tests drive the full state machine through an
//! in-process channel transport without opening sockets.

use crate::protocol::{ClientFrame, ServerFrame};
use thiserror::Error;

pub mod ws;

pub use ws::WsConnector;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Inbound event from an established transport
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed server frame
    Frame(ServerFrame),
    /// The peer went away. `graceful` is true only for the explicit
    /// manual-disconnect close reason; everything else is a failure the
    /// reconnect policy applies to.
    Closed { graceful: bool, reason: String },
}

/// One established duplex channel to the server
#[async_trait::async_trait]
pub trait FeedTransport: Send {
    /// Write a client frame to the wire
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError>;

    /// Receive the next inbound event. Yields `Closed` exactly once when the
    /// peer goes away; callers must not poll again after that.
    async fn recv(&mut self) -> TransportEvent;

    /// Close with the explicit manual-disconnect reason. Best-effort.
    async fn close(&mut self);
}

/// Factory for transport connections
///
/// The bearer token is presented as part of the handshake (query parameter on
/// the upgrade request); the connector does not validate or refresh it.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: FeedTransport + 'static;

    async fn connect(&self, token: &str) -> Result<Self::Transport, TransportError>;
}
