//! Client-side connection lifecycle
//!
//! One [`FeedClient`] owns one logical connection: it authenticates,
//! exchanges heartbeats, surfaces status to the owning application, and
//! reconnects with backoff when the transport fails. Transport and heartbeat
//! failures never propagate as errors to application code; they surface only
//! through the status callbacks.

pub mod feed;
pub mod handlers;
pub mod heartbeat;
pub mod reconnect;
pub mod state;

pub use feed::{FeedClient, FeedOptions};
pub use handlers::{HandlerRegistry, Subscription};
pub use heartbeat::{HeartbeatMonitor, Liveness};
pub use reconnect::ReconnectPolicy;
pub use state::{CloseReason, ConnectionState, ConnectionStatus};
