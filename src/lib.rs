//! riskfeed - Real-time risk alert distribution
//!
//! The persistent-connection lifecycle and broadcast layer between a periodic
//! scoring job and many concurrently connected subscribers. The server fans
//! each new reading out over live WebSocket connections with per-tier
//! capacity and rate limits; the client runs an explicit connection state
//! machine with heartbeat monitoring and bounded reconnect backoff.
//!
//! # Quick Start
//!
//! ```no_run
//! use riskfeed::client::{FeedClient, FeedOptions};
//! use riskfeed::transport::WsConnector;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = WsConnector::new("wss://feed.example.com/feed")?;
//! let client = FeedClient::new(connector, FeedOptions::new("bearer-token"));
//!
//! let _messages = client.on_message(|body| {
//!     println!("score {} band {:?}", body.reading.score, body.band);
//! });
//! let _statuses = client.on_status(|status| {
//!     println!("connected={} reconnecting={}", status.connected, status.reconnecting);
//! });
//!
//! client.connect();
//! # Ok(())
//! # }
//! ```
//!
//! Server side, readings enter through [`server::BroadcastEngine::publish_reading`]
//! and reach every registered subscriber classified against their own
//! thresholds.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod testing;
pub mod tier;
pub mod transport;

pub use client::{FeedClient, FeedOptions};
pub use config::RiskfeedConfig;
pub use error::{FeedError, FeedResult};
pub use protocol::{AlertEvent, Reading, Severity, Thresholds};
pub use server::{BroadcastEngine, FeedServer, HeartbeatSweeper, SubscriberRegistry};
pub use tier::{Tier, TierLimits};
