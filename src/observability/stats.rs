//! Operational HTTP endpoints for dashboards and orchestration
//!
//! `GET /health` answers liveness probes; `GET /stats` exposes the registry's
//! per-tier connection counts. Both are read-only views over state owned
//! elsewhere.

use crate::server::SubscriberRegistry;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::Filter;

/// HTTP server exposing health and registry statistics
pub struct StatsServer {
    service_id: String,
    port: u16,
    registry: Arc<SubscriberRegistry>,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    service_id: String,
    status: &'static str,
    uptime_secs: u64,
    timestamp: u64,
}

impl StatsServer {
    pub fn new(service_id: String, port: u16, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            service_id,
            port,
            registry,
            started_at: SystemTime::now(),
        }
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let health_server = Arc::clone(&self);
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = Arc::clone(&health_server);
            async move {
                let uptime_secs = server
                    .started_at
                    .elapsed()
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let response = HealthResponse {
                    service_id: server.service_id.clone(),
                    status: "ok",
                    uptime_secs,
                    timestamp: SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0),
                };
                Ok::<_, Infallible>(warp::reply::json(&response))
            }
        });

        let stats_server = Arc::clone(&self);
        let stats_route = warp::path("stats").and(warp::get()).and_then(move || {
            let server = Arc::clone(&stats_server);
            async move {
                // Synchronous read off the per-tier counters
                Ok::<_, Infallible>(warp::reply::json(&server.registry.stats()))
            }
        });

        let routes = health_route.or(stats_route);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenClaims;
    use crate::protocol::Thresholds;
    use crate::tier::{StaticTierLimits, Tier};
    use chrono::Utc;

    fn registry() -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new(
            Arc::new(StaticTierLimits::default()),
            Thresholds::default(),
        ))
    }

    #[tokio::test]
    async fn test_stats_reflect_registrations() {
        let registry = registry();
        let _handle = registry
            .register(
                &TokenClaims {
                    subscriber_id: "sub-1".to_string(),
                    tier: Tier::Premium,
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                },
                None,
            )
            .await
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.premium, 1);
        assert_eq!(stats.total, 1);

        let body = serde_json::to_value(stats).unwrap();
        assert_eq!(body["premium"], 1);
        assert_eq!(body["standard"], 0);
    }
}
