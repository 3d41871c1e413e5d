//! WebSocket endpoint for subscriber connections
//!
//! Handshake: the bearer token arrives as a query parameter on the upgrade
//! request, is validated exactly once, and the connection is registered
//! against the subscriber's tier caps. Rejections are answered with a typed
//! error frame before the socket closes, so callers can distinguish
//! authentication failures (refresh the token) from capacity failures
//! (prompt an upgrade).

use super::broadcast::BroadcastEngine;
use super::evaluator::ThresholdEvaluator;
use super::registry::{ConnectionHandle, SubscriberRegistry};
use crate::auth::TokenValidator;
use crate::protocol::{parse_client_frame, ClientPayload, ErrorCode, ServerFrame};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

#[derive(Debug, Deserialize)]
struct FeedQuery {
    token: String,
    /// Optional offline delivery target registered alongside the connection
    webhook: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadingSubmission {
    score: f64,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, serde::Serialize)]
struct IngestResponse {
    delivered: usize,
    rate_limited: usize,
    queued_offline: usize,
}

/// The feed WebSocket server
pub struct FeedServer {
    registry: Arc<SubscriberRegistry>,
    engine: Arc<BroadcastEngine>,
    validator: Arc<dyn TokenValidator>,
    heartbeat_interval: Duration,
}

impl FeedServer {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        engine: Arc<BroadcastEngine>,
        validator: Arc<dyn TokenValidator>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            validator,
            heartbeat_interval,
        }
    }

    /// `GET /feed` upgrade route
    pub fn route(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        warp::path("feed")
            .and(warp::ws())
            .and(warp::query::<FeedQuery>())
            .map(move |ws: Ws, query: FeedQuery| {
                let server = Arc::clone(&self);
                ws.on_upgrade(move |socket| server.handle_connection(socket, query))
            })
    }

    /// `POST /readings`: the scoring job's "new reading" entry point
    pub fn ingest_route(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        warp::path("readings")
            .and(warp::post())
            .and(warp::body::json())
            .and_then(move |submission: ReadingSubmission| {
                let server = Arc::clone(&self);
                async move {
                    match crate::protocol::Reading::new(
                        submission.score,
                        submission.metadata.unwrap_or(serde_json::Value::Null),
                    ) {
                        Ok(reading) => {
                            let summary = server.engine.publish_reading(reading).await;
                            Ok::<_, std::convert::Infallible>(warp::reply::with_status(
                                warp::reply::json(&IngestResponse {
                                    delivered: summary.delivered,
                                    rate_limited: summary.rate_limited,
                                    queued_offline: summary.queued_offline,
                                }),
                                warp::http::StatusCode::ACCEPTED,
                            ))
                        }
                        Err(e) => Ok(warp::reply::with_status(
                            warp::reply::json(&serde_json::json!({"error": e.to_string()})),
                            warp::http::StatusCode::BAD_REQUEST,
                        )),
                    }
                }
            })
    }

    /// All server routes: feed upgrade plus reading ingest
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let feed = Arc::clone(&self).route();
        let ingest = self.ingest_route();
        feed.or(ingest)
    }

    async fn handle_connection(self: Arc<Self>, socket: WebSocket, query: FeedQuery) {
        let (mut ws_tx, mut ws_rx) = socket.split();

        let handle = match self.accept(&query.token, query.webhook).await {
            Ok(handle) => handle,
            Err(rejection) => {
                if let Some(text) = encode(&rejection) {
                    let _ = ws_tx.send(Message::text(text)).await;
                }
                let _ = ws_tx.close().await;
                return;
            }
        };

        let ConnectionHandle {
            connection_id,
            subscriber_id,
            mut outbound,
            sender: frame_tx,
            ..
        } = handle;

        // Ack first, then the freshest reading so a new connection starts
        // with the current value instead of waiting for the next cycle
        let _ = frame_tx
            .send(ServerFrame::connection_ack(
                connection_id,
                self.heartbeat_interval.as_secs(),
            ))
            .await;
        if let Some(reading) = self.engine.last_reading().await {
            if let Some(thresholds) = self.registry.thresholds_for(&subscriber_id).await {
                let classification = ThresholdEvaluator::classify(&reading, &thresholds);
                let _ = frame_tx
                    .send(ServerFrame::classified(
                        reading,
                        classification.band,
                        classification.alert_triggered,
                    ))
                    .await;
            }
        }

        // Writer: pump queued frames onto the wire. A write failure means the
        // connection is presumed dead and is torn down, never retried.
        let writer_registry = Arc::clone(&self.registry);
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let Some(text) = encode(&frame) else { continue };
                if ws_tx.send(Message::text(text)).await.is_err() {
                    warn!(connection_id = %connection_id, "Wire write failed, tearing down");
                    writer_registry.unregister(connection_id).await;
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader: heartbeat acks and threshold updates
        while let Some(result) = ws_rx.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "Read error");
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            if !msg.is_text() && !msg.is_binary() {
                continue;
            }
            match parse_client_frame(msg.as_bytes()) {
                Ok(frame) => match frame.payload {
                    ClientPayload::HeartbeatAck => {
                        self.registry.record_heartbeat_ack(connection_id).await;
                    }
                    ClientPayload::ConfigUpdate { thresholds } => {
                        self.registry
                            .update_thresholds(&subscriber_id, thresholds)
                            .await;
                    }
                },
                Err(e) => {
                    // Invalid frames are answered, not fatal: the connection
                    // stays up with its previous configuration
                    let code = if looks_like_config_update(msg.as_bytes()) {
                        ErrorCode::InvalidThresholds
                    } else {
                        ErrorCode::InvalidFrame
                    };
                    let _ = frame_tx.try_send(ServerFrame::error(code, e.to_string()));
                }
            }
        }

        info!(
            connection_id = %connection_id,
            subscriber_id = %subscriber_id,
            "Connection closed"
        );
        self.registry.unregister(connection_id).await;
        drop(frame_tx);
        let _ = writer.await;
    }

    /// Validate the token and register the connection, mapping failures to
    /// the error frame sent back before closing
    async fn accept(
        &self,
        token: &str,
        webhook: Option<String>,
    ) -> Result<ConnectionHandle, ServerFrame> {
        let claims = self
            .validator
            .validate(token)
            .await
            .map_err(|e| ServerFrame::error(ErrorCode::AuthFailed, e.to_string()))?;
        if claims.is_expired(Utc::now()) {
            return Err(ServerFrame::error(ErrorCode::AuthFailed, "token expired"));
        }

        self.registry.register(&claims, webhook).await.map_err(|e| {
            let code = match &e {
                crate::error::FeedError::TierNotEligible { .. } => ErrorCode::TierNotEligible,
                crate::error::FeedError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
                _ => ErrorCode::Internal,
            };
            ServerFrame::error(code, e.to_string())
        })
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            None
        }
    }
}

/// Best-effort sniff so a bad threshold update gets the more specific code
fn looks_like_config_update(payload: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .is_some_and(|t| t == "config_update")
}
