//! Subscriber registry: the single shared mutable structure on the server
//!
//! Maps subscriber identity to its set of live connections and keeps per-tier
//! counters of active connections. All mutation goes through one write lock,
//! so no reader ever observes a half-updated counter. Fan-out snapshots may
//! trail a concurrent registration by at most one broadcast cycle; that
//! relaxation is deliberate.

use crate::auth::TokenClaims;
use crate::error::FeedError;
use crate::protocol::{ServerFrame, Thresholds, PROTOCOL_VERSION};
use crate::tier::{Tier, TierLimitSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Outbound queue depth per connection. A consumer that falls this far
/// behind is effectively dead and will be evicted by the heartbeat sweep.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Handle returned to the connection task on successful registration
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub subscriber_id: String,
    pub tier: Tier,
    pub protocol_version: String,
    /// Frames queued by the broadcast engine and heartbeat sweep
    pub outbound: mpsc::Receiver<ServerFrame>,
    /// Sender clone for pushing frames from the connection's own read loop
    pub sender: mpsc::Sender<ServerFrame>,
}

#[derive(Clone)]
struct ConnectionEntry {
    connection_id: Uuid,
    tier: Tier,
    created_at: DateTime<Utc>,
    last_heartbeat_ack: Instant,
    sender: mpsc::Sender<ServerFrame>,
}

struct SubscriberEntry {
    tier: Tier,
    thresholds: Thresholds,
    offline_target: Option<String>,
    connections: HashMap<Uuid, ConnectionEntry>,
}

struct RegistryInner {
    subscribers: HashMap<String, SubscriberEntry>,
    /// Reverse index: connection id to owning subscriber
    owners: HashMap<Uuid, String>,
}

/// Active connection counts per tier, readable synchronously
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegistryStats {
    pub standard: usize,
    pub premium: usize,
    pub total: usize,
}

/// Snapshot of one live connection for fan-out
#[derive(Clone)]
pub struct ConnectionSnapshot {
    pub connection_id: Uuid,
    pub sender: mpsc::Sender<ServerFrame>,
}

/// Snapshot of one subscriber for fan-out
pub struct SubscriberSnapshot {
    pub subscriber_id: String,
    pub tier: Tier,
    pub thresholds: Thresholds,
    pub offline_target: Option<String>,
    pub connections: Vec<ConnectionSnapshot>,
}

/// Tracks live connections, their tier, and their threshold configuration
pub struct SubscriberRegistry {
    inner: RwLock<RegistryInner>,
    standard_count: AtomicUsize,
    premium_count: AtomicUsize,
    limits: Arc<dyn TierLimitSource>,
    default_thresholds: Thresholds,
}

impl SubscriberRegistry {
    pub fn new(limits: Arc<dyn TierLimitSource>, default_thresholds: Thresholds) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                subscribers: HashMap::new(),
                owners: HashMap::new(),
            }),
            standard_count: AtomicUsize::new(0),
            premium_count: AtomicUsize::new(0),
            limits,
            default_thresholds,
        }
    }

    /// Register a new connection for an authenticated subscriber
    ///
    /// Rejects outright when the tier has no real-time access, and rejects
    /// (never queues) when the tier's concurrent-connection cap is reached.
    pub async fn register(
        &self,
        claims: &TokenClaims,
        offline_target: Option<String>,
    ) -> Result<ConnectionHandle, FeedError> {
        if !claims.tier.eligible_for_live() {
            return Err(FeedError::TierNotEligible { tier: claims.tier });
        }

        let cap = self.limits.limits(claims.tier).max_connections;
        let mut inner = self.inner.write().await;

        let entry = inner
            .subscribers
            .entry(claims.subscriber_id.clone())
            .or_insert_with(|| SubscriberEntry {
                tier: claims.tier,
                thresholds: self.default_thresholds,
                offline_target: None,
                connections: HashMap::new(),
            });
        // The token is authoritative for tier and delivery target
        entry.tier = claims.tier;
        if offline_target.is_some() {
            entry.offline_target = offline_target;
        }

        if entry.connections.len() >= cap {
            return Err(FeedError::CapacityExceeded {
                subscriber_id: claims.subscriber_id.clone(),
                tier: claims.tier,
                active: entry.connections.len(),
                cap,
            });
        }

        let connection_id = Uuid::new_v4();
        let (sender, outbound) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        entry.connections.insert(
            connection_id,
            ConnectionEntry {
                connection_id,
                tier: claims.tier,
                created_at: Utc::now(),
                last_heartbeat_ack: Instant::now(),
                sender: sender.clone(),
            },
        );
        inner
            .owners
            .insert(connection_id, claims.subscriber_id.clone());
        self.counter_for(claims.tier).fetch_add(1, Ordering::SeqCst);

        info!(
            connection_id = %connection_id,
            subscriber_id = %claims.subscriber_id,
            tier = %claims.tier,
            "Connection registered"
        );

        Ok(ConnectionHandle {
            connection_id,
            subscriber_id: claims.subscriber_id.clone(),
            tier: claims.tier,
            protocol_version: PROTOCOL_VERSION.to_string(),
            outbound,
            sender,
        })
    }

    /// Remove a connection. Idempotent; the subscriber profile (tier,
    /// thresholds, offline target) survives for offline delivery decisions.
    pub async fn unregister(&self, connection_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let Some(subscriber_id) = inner.owners.remove(&connection_id) else {
            return false;
        };
        let Some(entry) = inner.subscribers.get_mut(&subscriber_id) else {
            return false;
        };
        let Some(removed) = entry.connections.remove(&connection_id) else {
            return false;
        };
        self.counter_for(removed.tier).fetch_sub(1, Ordering::SeqCst);
        debug!(
            connection_id = %connection_id,
            subscriber_id = %subscriber_id,
            "Connection unregistered"
        );
        true
    }

    /// Record a heartbeat acknowledgment for a connection
    pub async fn record_heartbeat_ack(&self, connection_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(subscriber_id) = inner.owners.get(&connection_id).cloned() else {
            return;
        };
        if let Some(entry) = inner.subscribers.get_mut(&subscriber_id) {
            if let Some(conn) = entry.connections.get_mut(&connection_id) {
                conn.last_heartbeat_ack = Instant::now();
            }
        }
    }

    /// Replace a subscriber's threshold configuration. The `Thresholds` type
    /// is monotone by construction, so no validation happens here.
    pub async fn update_thresholds(&self, subscriber_id: &str, thresholds: Thresholds) -> bool {
        let mut inner = self.inner.write().await;
        match inner.subscribers.get_mut(subscriber_id) {
            Some(entry) => {
                entry.thresholds = thresholds;
                info!(subscriber_id = %subscriber_id, "Thresholds updated");
                true
            }
            None => false,
        }
    }

    pub async fn thresholds_for(&self, subscriber_id: &str) -> Option<Thresholds> {
        let inner = self.inner.read().await;
        inner.subscribers.get(subscriber_id).map(|e| e.thresholds)
    }

    /// Live connections for one subscriber
    pub async fn live_connections_for(&self, subscriber_id: &str) -> Vec<ConnectionSnapshot> {
        let inner = self.inner.read().await;
        inner
            .subscribers
            .get(subscriber_id)
            .map(|entry| {
                entry
                    .connections
                    .values()
                    .map(|c| ConnectionSnapshot {
                        connection_id: c.connection_id,
                        sender: c.sender.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full snapshot for a broadcast cycle
    pub async fn snapshot(&self) -> Vec<SubscriberSnapshot> {
        let inner = self.inner.read().await;
        inner
            .subscribers
            .iter()
            .map(|(subscriber_id, entry)| SubscriberSnapshot {
                subscriber_id: subscriber_id.clone(),
                tier: entry.tier,
                thresholds: entry.thresholds,
                offline_target: entry.offline_target.clone(),
                connections: entry
                    .connections
                    .values()
                    .map(|c| ConnectionSnapshot {
                        connection_id: c.connection_id,
                        sender: c.sender.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Connections whose last heartbeat ack is older than the timeout
    pub async fn stale_connections(&self, timeout: Duration, now: Instant) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .subscribers
            .values()
            .flat_map(|entry| entry.connections.values())
            .filter(|c| now.duration_since(c.last_heartbeat_ack) >= timeout)
            .map(|c| c.connection_id)
            .collect()
    }

    /// Connection age for observability
    pub async fn connection_created_at(&self, connection_id: Uuid) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        let subscriber_id = inner.owners.get(&connection_id)?;
        inner
            .subscribers
            .get(subscriber_id)?
            .connections
            .get(&connection_id)
            .map(|c| c.created_at)
    }

    /// Synchronous per-tier connection counts for operational dashboards
    pub fn stats(&self) -> RegistryStats {
        let standard = self.standard_count.load(Ordering::SeqCst);
        let premium = self.premium_count.load(Ordering::SeqCst);
        RegistryStats {
            standard,
            premium,
            total: standard + premium,
        }
    }

    fn counter_for(&self, tier: Tier) -> &AtomicUsize {
        match tier {
            // Free never registers; the counter is unreachable but total
            // accounting stays honest if that ever changes
            Tier::Free | Tier::Standard => &self.standard_count,
            Tier::Premium => &self.premium_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::StaticTierLimits;

    fn claims(subscriber_id: &str, tier: Tier) -> TokenClaims {
        TokenClaims {
            subscriber_id: subscriber_id.to_string(),
            tier,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn registry() -> SubscriberRegistry {
        SubscriberRegistry::new(
            Arc::new(StaticTierLimits::default()),
            Thresholds::default(),
        )
    }

    #[tokio::test]
    async fn test_free_tier_rejected_outright() {
        let registry = registry();
        let result = registry.register(&claims("sub-free", Tier::Free), None).await;
        assert!(matches!(result, Err(FeedError::TierNotEligible { .. })));
        assert_eq!(registry.stats().total, 0);
    }

    #[tokio::test]
    async fn test_register_and_unregister_roundtrip() {
        let registry = registry();
        let handle = registry
            .register(&claims("sub-1", Tier::Standard), None)
            .await
            .unwrap();
        assert_eq!(registry.stats().standard, 1);
        assert_eq!(
            registry.live_connections_for("sub-1").await.len(),
            1
        );
        assert!(registry
            .connection_created_at(handle.connection_id)
            .await
            .is_some());

        assert!(registry.unregister(handle.connection_id).await);
        assert_eq!(registry.stats().standard, 0);
        assert!(registry.live_connections_for("sub-1").await.is_empty());

        // Idempotent removal
        assert!(!registry.unregister(handle.connection_id).await);
        assert_eq!(registry.stats().standard, 0);
    }

    #[tokio::test]
    async fn test_connection_cap_rejects_excess() {
        let registry = registry();
        let c = claims("sub-1", Tier::Standard);
        let _a = registry.register(&c, None).await.unwrap();
        let _b = registry.register(&c, None).await.unwrap();

        // Standard cap is 2
        let result = registry.register(&c, None).await;
        assert!(matches!(
            result,
            Err(FeedError::CapacityExceeded { active: 2, cap: 2, .. })
        ));
        assert_eq!(registry.stats().standard, 2);
    }

    #[tokio::test]
    async fn test_cap_is_per_subscriber() {
        let registry = registry();
        let _a1 = registry
            .register(&claims("sub-a", Tier::Standard), None)
            .await
            .unwrap();
        let _a2 = registry
            .register(&claims("sub-a", Tier::Standard), None)
            .await
            .unwrap();
        // A different subscriber still has headroom
        assert!(registry
            .register(&claims("sub-b", Tier::Standard), None)
            .await
            .is_ok());
        assert_eq!(registry.stats().standard, 3);
    }

    #[tokio::test]
    async fn test_concurrent_registration_never_exceeds_cap() {
        let registry = Arc::new(SubscriberRegistry::new(
            Arc::new(StaticTierLimits::default()),
            Thresholds::default(),
        ));
        let c = claims("sub-1", Tier::Premium); // cap 10

        let mut handles = Vec::new();
        for _ in 0..11 {
            let registry = Arc::clone(&registry);
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                registry.register(&c, None).await.is_ok()
            }));
        }

        let mut accepted = 0;
        let mut rejected = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            } else {
                rejected += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(rejected, 1);
        assert_eq!(registry.stats().premium, 10);
    }

    #[tokio::test]
    async fn test_thresholds_update_and_lookup() {
        let registry = registry();
        let _h = registry
            .register(&claims("sub-1", Tier::Standard), None)
            .await
            .unwrap();
        assert_eq!(
            registry.thresholds_for("sub-1").await,
            Some(Thresholds::default())
        );

        let custom = Thresholds::new(0.1, 0.2, 0.5).unwrap();
        assert!(registry.update_thresholds("sub-1", custom).await);
        assert_eq!(registry.thresholds_for("sub-1").await, Some(custom));

        assert!(!registry.update_thresholds("sub-unknown", custom).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_detection() {
        let registry = registry();
        let handle = registry
            .register(&claims("sub-1", Tier::Standard), None)
            .await
            .unwrap();

        let timeout = Duration::from_secs(60);
        assert!(registry
            .stale_connections(timeout, Instant::now())
            .await
            .is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let stale = registry.stale_connections(timeout, Instant::now()).await;
        assert_eq!(stale, vec![handle.connection_id]);

        // An ack resets the clock
        registry.record_heartbeat_ack(handle.connection_id).await;
        assert!(registry
            .stale_connections(timeout, Instant::now())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_profile_survives_disconnect() {
        let registry = registry();
        let custom = Thresholds::new(0.1, 0.2, 0.5).unwrap();
        let handle = registry
            .register(&claims("sub-1", Tier::Standard), Some("https://hooks.example/1".into()))
            .await
            .unwrap();
        registry.update_thresholds("sub-1", custom).await;
        registry.unregister(handle.connection_id).await;

        // Profile retained for offline delivery decisions
        assert_eq!(registry.thresholds_for("sub-1").await, Some(custom));
        let snapshot = registry.snapshot().await;
        let sub = snapshot.iter().find(|s| s.subscriber_id == "sub-1").unwrap();
        assert!(sub.connections.is_empty());
        assert_eq!(sub.offline_target.as_deref(), Some("https://hooks.example/1"));
    }
}
