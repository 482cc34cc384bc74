//! Latency-based status classification for a single probe result.

use serde::{Deserialize, Serialize};

use super::EngineError;

/// Verdict for a single probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Healthy,
    Slow,
    Down,
}

/// Validated latency thresholds for one target.
///
/// The slow threshold must be strictly below the down threshold.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    slow_ms: f64,
    down_ms: f64,
}

impl Thresholds {
    pub fn new(slow_ms: f64, down_ms: f64) -> Result<Self, EngineError> {
        if !slow_ms.is_finite() || !down_ms.is_finite() || slow_ms <= 0.0 || slow_ms >= down_ms {
            return Err(EngineError::InvalidThresholdConfig { slow_ms, down_ms });
        }
        Ok(Self { slow_ms, down_ms })
    }

    pub fn slow_ms(&self) -> f64 {
        self.slow_ms
    }

    pub fn down_ms(&self) -> f64 {
        self.down_ms
    }
}

/// Classify a probe result against the target's thresholds.
///
/// A nominally successful result without a latency value is classified as
/// down; the caller logs the data anomaly. TLS expiry does not enter into
/// this verdict, it is tracked separately by the incident manager.
pub fn classify(success: bool, latency_ms: Option<f64>, thresholds: &Thresholds) -> Classification {
    if !success {
        return Classification::Down;
    }

    let latency = match latency_ms {
        Some(l) if l >= 0.0 => l,
        _ => return Classification::Down,
    };

    if latency >= thresholds.down_ms() {
        Classification::Down
    } else if latency >= thresholds.slow_ms() {
        Classification::Slow
    } else {
        Classification::Healthy
    }
}
