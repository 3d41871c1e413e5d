//! Client-side heartbeat liveness tracking
//!
//! Receipt of any server frame is evidence of liveness. One silent interval
//! degrades the connection; two silent intervals mean the socket is presumed
//! half-open and the connection is torn down for reconnection even if the
//! transport never reported a closure.

use std::time::Duration;
use tokio::time::Instant;

/// Liveness verdict for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Frames arriving within one heartbeat interval
    Healthy,
    /// One interval missed, transport still open
    Overdue,
    /// Two intervals missed, connection presumed dead
    Failed,
}

/// Pure deadline arithmetic for the heartbeat watchdog
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Build from the failure window alone; the overdue boundary sits at the
    /// half-way point (one server heartbeat interval)
    pub fn from_timeout(timeout: Duration) -> Self {
        Self {
            interval: timeout / 2,
            timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Assess liveness given the time since the last inbound frame (pure
    /// function)
    pub fn assess(&self, since_last_frame: Duration) -> Liveness {
        if since_last_frame >= self.timeout {
            Liveness::Failed
        } else if since_last_frame >= self.interval {
            Liveness::Overdue
        } else {
            Liveness::Healthy
        }
    }

    /// Instant at which the connection becomes overdue
    pub fn overdue_deadline(&self, last_frame: Instant) -> Instant {
        last_frame + self.interval
    }

    /// Instant at which the connection is presumed dead
    pub fn failure_deadline(&self, last_frame: Instant) -> Instant {
        last_frame + self.timeout
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::from_timeout(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_boundaries() {
        let monitor = HeartbeatMonitor::default();
        assert_eq!(monitor.assess(Duration::from_secs(0)), Liveness::Healthy);
        assert_eq!(monitor.assess(Duration::from_secs(29)), Liveness::Healthy);
        assert_eq!(monitor.assess(Duration::from_secs(30)), Liveness::Overdue);
        assert_eq!(monitor.assess(Duration::from_secs(59)), Liveness::Overdue);
        assert_eq!(monitor.assess(Duration::from_secs(60)), Liveness::Failed);
        assert_eq!(monitor.assess(Duration::from_secs(300)), Liveness::Failed);
    }

    #[test]
    fn test_from_timeout_splits_interval() {
        let monitor = HeartbeatMonitor::from_timeout(Duration::from_secs(40));
        assert_eq!(monitor.interval(), Duration::from_secs(20));
        assert_eq!(monitor.timeout(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_order() {
        let monitor = HeartbeatMonitor::default();
        let now = Instant::now();
        assert!(monitor.overdue_deadline(now) < monitor.failure_deadline(now));
        assert_eq!(
            monitor.failure_deadline(now) - monitor.overdue_deadline(now),
            Duration::from_secs(30)
        );
    }
}
