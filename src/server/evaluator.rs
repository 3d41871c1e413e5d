//! Per-subscriber threshold evaluation
//!
//! Pure classification of a reading against one subscriber's threshold
//! configuration. Called once per subscriber per reading by the broadcast
//! engine, concurrently across fan-out workers.

use crate::protocol::{Reading, Severity, Thresholds};

/// Result of classifying one reading for one subscriber
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub band: Severity,
    /// True only when the score reaches the subscriber's high cut point
    pub alert_triggered: bool,
}

/// Pure threshold evaluation logic
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Classify a reading into exactly one band and decide whether it
    /// constitutes an alert (pure function)
    ///
    /// Thresholds are monotone by construction, so no validation happens
    /// here. Ties are inclusive of the higher band.
    pub fn classify(reading: &Reading, thresholds: &Thresholds) -> Classification {
        Classification {
            band: thresholds.band_for(reading.score),
            alert_triggered: reading.score >= thresholds.high(),
        }
    }
}
