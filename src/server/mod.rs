//! Server side: subscriber registry, threshold evaluation, broadcast engine,
//! heartbeat sweep, and the WebSocket endpoint
//!
//! The registry is the only cross-connection shared mutable state; everything
//! else is owned by the connection's handling task or the broadcast cycle.

pub mod broadcast;
pub mod evaluator;
pub mod registry;
pub mod sweeper;
pub mod ws;

pub use broadcast::{BroadcastEngine, BroadcastSummary, OfflineNotifier};
pub use evaluator::{Classification, ThresholdEvaluator};
pub use registry::{
    ConnectionHandle, ConnectionSnapshot, RegistryStats, SubscriberRegistry, SubscriberSnapshot,
};
pub use sweeper::HeartbeatSweeper;
pub use ws::FeedServer;
