//! Reconnect backoff policy
//!
//! Pure delay computation: exponential backoff from a base delay, capped,
//! with up to one second of random jitter so a fleet of clients does not
//! reconnect in lockstep after a server restart.

use crate::config::ReconnectSection;
use rand::Rng;
use std::time::Duration;

const JITTER_MAX_MS: u64 = 1000;

/// Backoff schedule for reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_config(section: &ReconnectSection) -> Self {
        Self {
            base: Duration::from_secs(section.base_delay_secs),
            cap: Duration::from_secs(section.max_delay_secs),
            max_attempts: section.max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic part of the delay for the given attempt (1-based):
    /// `min(base * 2^(attempt-1), cap)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        // Exponent is clamped well past the point where the cap takes over
        let exponent = attempt.saturating_sub(1).min(20);
        let raw = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap);
        raw.min(self.cap)
    }

    /// Full delay for the given attempt: backoff plus random jitter in
    /// [0, 1 s]
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
        self.backoff(attempt) + jitter
    }

    /// Whether the given attempt number exceeds the configured budget
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}
