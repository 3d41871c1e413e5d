//! Feed protocol: wire frames and the shared data model
//!
//! The wire format is JSON over a duplex transport. Frame shapes are defined
//! in [`messages`]; parsing helpers are pure functions so they can be tested
//! without any transport.

pub mod messages;

pub use messages::{
    parse_client_frame, parse_server_frame, AlertBody, AlertEvent, ClientFrame, ClientPayload,
    ConnectionAck, DeliveryOutcome, ErrorBody, ErrorCode, FrameError, Reading, Severity,
    ServerFrame, ServerPayload, ThresholdError, Thresholds, PROTOCOL_VERSION,
};
