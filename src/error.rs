//! Crate-wide error taxonomy
//!
//! Transport and heartbeat failures are handled inside the connection state
//! machine and the delivery engine; they surface to applications through
//! status callbacks only. Authentication and capacity failures are returned
//! synchronously as typed results, because the caller must make an immediate
//! decision (refresh the token, prompt an upgrade, give up).

use crate::auth::AuthError;
use crate::protocol::{FrameError, ThresholdError};
use crate::tier::Tier;
use crate::transport::TransportError;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for feed operations
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("tier {tier} is not eligible for live connections")]
    TierNotEligible { tier: Tier },

    #[error("connection cap reached for {subscriber_id}: {active} active, tier {tier} allows {cap}")]
    CapacityExceeded {
        subscriber_id: String,
        tier: Tier,
        active: usize,
        cap: usize,
    },

    #[error("delivery to connection {connection_id} failed: {message}")]
    DeliveryFailed {
        connection_id: Uuid,
        message: String,
    },

    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid thresholds: {0}")]
    Thresholds(#[from] ThresholdError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl FeedError {
    /// Whether the reconnect policy applies to this failure. Authentication
    /// and capacity rejections are surfaced to the caller instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Transport(_) | FeedError::DeliveryFailed { .. })
    }

    /// Create a delivery error for a specific connection
    pub fn delivery_failed(connection_id: Uuid, message: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            connection_id,
            message: message.into(),
        }
    }
}

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
