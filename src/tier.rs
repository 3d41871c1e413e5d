//! Subscription tiers and tier-dependent resource limits
//!
//! Tier limits are read from the billing/subscription collaborator at
//! registration time, never polled continuously. The `TierLimitSource` trait
//! is the injection seam for that collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service tier for a subscriber account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Dashboard-polling only, never holds a live connection
    Free,
    Standard,
    Premium,
}

impl Tier {
    /// Whether this tier may hold a live real-time connection
    pub fn eligible_for_live(&self) -> bool {
        matches!(self, Tier::Standard | Tier::Premium)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource caps attached to a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Maximum concurrent live connections per subscriber
    pub max_connections: usize,
    /// Maximum outbound messages per subscriber per minute
    pub max_messages_per_minute: u32,
}

impl TierLimits {
    /// Limits for a tier with no real-time access at all
    pub fn none() -> Self {
        Self {
            max_connections: 0,
            max_messages_per_minute: 0,
        }
    }
}

/// Source of tier limits, backed by the subscription/billing collaborator
pub trait TierLimitSource: Send + Sync {
    /// Resolve the caps for a tier. Called at registration time.
    fn limits(&self, tier: Tier) -> TierLimits;
}

/// Fixed limit table, loaded from configuration at startup
#[derive(Debug, Clone)]
pub struct StaticTierLimits {
    standard: TierLimits,
    premium: TierLimits,
}

impl StaticTierLimits {
    pub fn new(standard: TierLimits, premium: TierLimits) -> Self {
        Self { standard, premium }
    }
}

impl Default for StaticTierLimits {
    fn default() -> Self {
        Self {
            standard: TierLimits {
                max_connections: 2,
                max_messages_per_minute: 10,
            },
            premium: TierLimits {
                max_connections: 10,
                max_messages_per_minute: 100,
            },
        }
    }
}

impl TierLimitSource for StaticTierLimits {
    fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => TierLimits::none(),
            Tier::Standard => self.standard,
            Tier::Premium => self.premium,
        }
    }
}
