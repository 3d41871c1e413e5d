//! Server-side heartbeat: periodic probes plus eviction of silent connections
//!
//! On every tick the sweep evicts connections whose last acknowledgment is
//! older than the timeout window, then queues a heartbeat frame to every
//! survivor. Eviction drops the registry's outbound sender, which closes the
//! connection's writer and with it the transport.

use super::registry::SubscriberRegistry;
use crate::protocol::ServerFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic heartbeat prober and stale-connection evictor
pub struct HeartbeatSweeper {
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatSweeper {
    pub fn new(registry: Arc<SubscriberRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
        }
    }

    /// Spawn the background sweep task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "Starting heartbeat sweeper"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One sweep cycle: evict, then probe
    pub async fn sweep(&self) {
        let stale = self
            .registry
            .stale_connections(self.timeout, Instant::now())
            .await;
        for connection_id in stale {
            warn!(
                connection_id = %connection_id,
                "Evicting connection: no heartbeat ack within window"
            );
            self.registry.unregister(connection_id).await;
        }

        let snapshot = self.registry.snapshot().await;
        for subscriber in snapshot {
            for connection in subscriber.connections {
                // A full outbound queue means the consumer is already far
                // behind; skipping the probe lets the ack window expire and
                // the next sweep evict it
                if connection.sender.try_send(ServerFrame::heartbeat()).is_err() {
                    debug!(
                        connection_id = %connection.connection_id,
                        "Heartbeat not queued, outbound backed up"
                    );
                }
            }
        }
    }
}
