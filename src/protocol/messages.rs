//! Wire frame and data-model types for the feed protocol
//!
//! Every frame on the wire carries `{type, data, timestamp}`. Server-originated
//! frames are connection acks, heartbeats, alert/update payloads, and errors;
//! client-originated frames are limited to heartbeat acks and threshold
//! configuration updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Negotiated protocol version sent in the connection ack
pub const PROTOCOL_VERSION: &str = "1.0";

/// Frame parsing and validation errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("reading score {0} outside [0.0, 1.0]")]
    ScoreOutOfRange(f64),
}

/// Severity band of a reading relative to a set of thresholds
///
/// Ordering is by escalation, so band comparisons express "increased into a
/// watched band" directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Below the lowest watched band
    Normal,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Threshold validation errors, raised at configuration time only
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("{band} cut point {value} outside [0.0, 1.0]")]
    OutOfRange { band: &'static str, value: f64 },
    #[error("cut points must be non-decreasing: low={low}, medium={medium}, high={high}")]
    NotMonotonic { low: f64, medium: f64, high: f64 },
}

/// Three-band alert threshold configuration for one subscriber
///
/// Cut points are floats in [0, 1] and monotonically non-decreasing by
/// construction. Violations are rejected here, at configuration time, so
/// evaluation never re-validates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdBands")]
pub struct Thresholds {
    low: f64,
    medium: f64,
    high: f64,
}

/// Raw shape used for deserialization before validation
#[derive(Debug, Clone, Copy, Deserialize)]
struct ThresholdBands {
    low: f64,
    medium: f64,
    high: f64,
}

impl TryFrom<ThresholdBands> for Thresholds {
    type Error = ThresholdError;

    fn try_from(bands: ThresholdBands) -> Result<Self, Self::Error> {
        Thresholds::new(bands.low, bands.medium, bands.high)
    }
}

impl Thresholds {
    /// Validating constructor, the only way to obtain a `Thresholds`
    pub fn new(low: f64, medium: f64, high: f64) -> Result<Self, ThresholdError> {
        for (band, value) in [("low", low), ("medium", medium), ("high", high)] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ThresholdError::OutOfRange { band, value });
            }
        }
        if low > medium || medium > high {
            return Err(ThresholdError::NotMonotonic { low, medium, high });
        }
        Ok(Self { low, medium, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn medium(&self) -> f64 {
        self.medium
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Classify a score into exactly one band. A score equal to a cut point
    /// falls into the higher band.
    pub fn band_for(&self, score: f64) -> Severity {
        if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else if score >= self.low {
            Severity::Low
        } else {
            Severity::Normal
        }
    }
}

impl Default for Thresholds {
    /// Producer-level default banding applied when a subscriber has not
    /// configured thresholds of their own
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.8,
        }
    }
}

/// One immutable scored value produced by the upstream scoring job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Numeric risk score in [0.0, 1.0]
    pub score: f64,
    /// Severity label derived from the default banding at creation time
    pub severity: Severity,
    /// Free-form producer metadata
    #[serde(default)]
    pub metadata: Value,
}

impl Reading {
    /// Create a reading, rejecting scores outside [0, 1]
    pub fn new(score: f64, metadata: Value) -> Result<Self, FrameError> {
        if !(0.0..=1.0).contains(&score) || score.is_nan() {
            return Err(FrameError::ScoreOutOfRange(score));
        }
        Ok(Self {
            timestamp: Utc::now(),
            score,
            severity: Thresholds::default().band_for(score),
            metadata,
        })
    }
}

/// Outcome of one delivery attempt for one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    /// Written to a live connection
    Delivered,
    /// Handed off to the offline-delivery collaborator
    Queued,
    /// Dropped for this cycle (rate limit or dead connection)
    Dropped,
}

/// Result of evaluating one reading against one subscriber's thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub subscriber_id: String,
    pub reading: Reading,
    pub band: Severity,
    pub alert_triggered: bool,
    pub outcome: DeliveryOutcome,
}

/// Protocol error codes carried in server error frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailed,
    TierNotEligible,
    CapacityExceeded,
    InvalidFrame,
    InvalidThresholds,
    Internal,
}

/// Payload of a server error frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Payload of a connection ack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAck {
    pub connection_id: Uuid,
    pub protocol_version: String,
    pub heartbeat_interval_secs: u64,
}

/// Payload of alert and routine update frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertBody {
    pub reading: Reading,
    /// Per-subscriber classification of the reading
    pub band: Severity,
    pub alert_triggered: bool,
}

/// Server-originated frame payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerPayload {
    ConnectionAck(ConnectionAck),
    Heartbeat,
    Alert(AlertBody),
    Update(AlertBody),
    Error(ErrorBody),
}

/// A server-originated wire frame: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(flatten)]
    pub payload: ServerPayload,
    pub timestamp: DateTime<Utc>,
}

impl ServerFrame {
    fn now(payload: ServerPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn connection_ack(connection_id: Uuid, heartbeat_interval_secs: u64) -> Self {
        Self::now(ServerPayload::ConnectionAck(ConnectionAck {
            connection_id,
            protocol_version: PROTOCOL_VERSION.to_string(),
            heartbeat_interval_secs,
        }))
    }

    pub fn heartbeat() -> Self {
        Self::now(ServerPayload::Heartbeat)
    }

    /// Alert or routine update frame depending on the classification
    pub fn classified(reading: Reading, band: Severity, alert_triggered: bool) -> Self {
        let body = AlertBody {
            reading,
            band,
            alert_triggered,
        };
        if alert_triggered {
            Self::now(ServerPayload::Alert(body))
        } else {
            Self::now(ServerPayload::Update(body))
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::now(ServerPayload::Error(ErrorBody {
            code,
            message: message.into(),
        }))
    }
}

/// Client-originated frame payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientPayload {
    HeartbeatAck,
    ConfigUpdate { thresholds: Thresholds },
}

/// A client-originated wire frame: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub payload: ClientPayload,
    pub timestamp: DateTime<Utc>,
}

impl ClientFrame {
    pub fn heartbeat_ack() -> Self {
        Self {
            payload: ClientPayload::HeartbeatAck,
            timestamp: Utc::now(),
        }
    }

    pub fn config_update(thresholds: Thresholds) -> Self {
        Self {
            payload: ClientPayload::ConfigUpdate { thresholds },
            timestamp: Utc::now(),
        }
    }
}

/// Parse a server frame from raw wire bytes (pure function)
pub fn parse_server_frame(payload: &[u8]) -> Result<ServerFrame, FrameError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Parse a client frame from raw wire bytes (pure function)
pub fn parse_client_frame(payload: &[u8]) -> Result<ClientFrame, FrameError> {
    Ok(serde_json::from_slice(payload)?)
}
