//! Broadcast/delivery engine: fans readings out to live subscribers
//!
//! One reading per cycle. Per subscriber: classify, enforce the tier's
//! message-rate cap, deliver to each live connection in parallel. Dropping a
//! routine update is acceptable because the next reading supersedes it;
//! dropping an alert additionally logs a missed-alert warning for the
//! external delivery-audit collaborator. Failures are isolated per
//! connection.

use super::evaluator::ThresholdEvaluator;
use super::registry::{SubscriberRegistry, SubscriberSnapshot};
use crate::protocol::{AlertEvent, DeliveryOutcome, Reading, ServerFrame};
use crate::tier::{Tier, TierLimitSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Hand-off seam for the external offline-delivery collaborator
///
/// Fire-and-forget: the engine decides *that* an offline notification is
/// warranted, never waits for the outcome, and never retries.
#[async_trait]
pub trait OfflineNotifier: Send + Sync {
    async fn notify(&self, subscriber_id: &str, event: &AlertEvent);
}

/// Counters for one broadcast cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BroadcastSummary {
    /// Frames written to live connections
    pub delivered: usize,
    /// Subscribers skipped this cycle by their rate cap
    pub rate_limited: usize,
    /// Connections torn down on write failure
    pub failed: usize,
    /// Offline notifications handed off
    pub queued_offline: usize,
}

struct RateWindow {
    window_start: Instant,
    sent: u32,
}

/// Fans each new reading out over the current registry snapshot
pub struct BroadcastEngine {
    registry: Arc<SubscriberRegistry>,
    limits: Arc<dyn TierLimitSource>,
    notifier: Arc<dyn OfflineNotifier>,
    rate_windows: Mutex<HashMap<String, RateWindow>>,
    last_reading: RwLock<Option<Reading>>,
}

impl BroadcastEngine {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        limits: Arc<dyn TierLimitSource>,
        notifier: Arc<dyn OfflineNotifier>,
    ) -> Self {
        Self {
            registry,
            limits,
            notifier,
            rate_windows: Mutex::new(HashMap::new()),
            last_reading: RwLock::new(None),
        }
    }

    /// Most recent reading, retained so newly registered connections get the
    /// freshest value right after their connection ack
    pub async fn last_reading(&self) -> Option<Reading> {
        self.last_reading.read().await.clone()
    }

    /// Entry point for the scoring job: broadcast one new reading
    pub async fn publish_reading(&self, reading: Reading) -> BroadcastSummary {
        *self.last_reading.write().await = Some(reading.clone());

        let snapshot = self.registry.snapshot().await;
        debug!(
            score = reading.score,
            subscribers = snapshot.len(),
            "Broadcasting reading"
        );

        let mut summary = BroadcastSummary::default();
        let mut deliveries = Vec::new();

        for subscriber in snapshot {
            self.dispatch_subscriber(&reading, subscriber, &mut summary, &mut deliveries)
                .await;
        }

        // Per-connection sends run in parallel; a failure for one connection
        // never affects delivery to another
        for delivery in deliveries {
            match delivery.await {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    warn!(error = %e, "Delivery task aborted");
                    summary.failed += 1;
                }
            }
        }

        info!(
            delivered = summary.delivered,
            rate_limited = summary.rate_limited,
            failed = summary.failed,
            queued_offline = summary.queued_offline,
            "Broadcast cycle complete"
        );
        summary
    }

    async fn dispatch_subscriber(
        &self,
        reading: &Reading,
        subscriber: SubscriberSnapshot,
        summary: &mut BroadcastSummary,
        deliveries: &mut Vec<tokio::task::JoinHandle<bool>>,
    ) {
        let classification = ThresholdEvaluator::classify(reading, &subscriber.thresholds);

        if subscriber.connections.is_empty() {
            // Offline notification is warranted only for triggered alerts
            if classification.alert_triggered && subscriber.offline_target.is_some() {
                let event = AlertEvent {
                    subscriber_id: subscriber.subscriber_id.clone(),
                    reading: reading.clone(),
                    band: classification.band,
                    alert_triggered: true,
                    outcome: DeliveryOutcome::Queued,
                };
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    notifier.notify(&event.subscriber_id, &event).await;
                });
                summary.queued_offline += 1;
            }
            return;
        }

        if !self
            .acquire_rate_token(&subscriber.subscriber_id, subscriber.tier)
            .await
        {
            if classification.alert_triggered {
                // Escalated for reconciliation by the delivery-audit collaborator
                warn!(
                    subscriber_id = %subscriber.subscriber_id,
                    score = reading.score,
                    "Missed alert: message-rate cap exhausted"
                );
            } else {
                debug!(
                    subscriber_id = %subscriber.subscriber_id,
                    "Routine update dropped: message-rate cap exhausted"
                );
            }
            summary.rate_limited += 1;
            return;
        }

        let frame = ServerFrame::classified(
            reading.clone(),
            classification.band,
            classification.alert_triggered,
        );
        for connection in subscriber.connections {
            let frame = frame.clone();
            let registry = Arc::clone(&self.registry);
            deliveries.push(tokio::spawn(async move {
                if connection.sender.send(frame).await.is_err() {
                    // Presumed dead: tear down instead of retrying the write
                    warn!(
                        connection_id = %connection.connection_id,
                        "Write failed, unregistering connection"
                    );
                    registry.unregister(connection.connection_id).await;
                    false
                } else {
                    true
                }
            }));
        }
    }

    /// Take one rate token for this subscriber's current one-minute window.
    /// One token covers the whole broadcast cycle across the subscriber's
    /// connections.
    async fn acquire_rate_token(&self, subscriber_id: &str, tier: Tier) -> bool {
        let cap = self.limits.limits(tier).max_messages_per_minute;
        if cap == 0 {
            return false;
        }
        let now = Instant::now();
        let mut windows = self.rate_windows.lock().await;
        let window = windows
            .entry(subscriber_id.to_string())
            .or_insert(RateWindow {
                window_start: now,
                sent: 0,
            });
        if now.duration_since(window.window_start) >= RATE_WINDOW {
            window.window_start = now;
            window.sent = 0;
        }
        if window.sent >= cap {
            false
        } else {
            window.sent += 1;
            true
        }
    }
}
