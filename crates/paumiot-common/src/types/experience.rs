//! Experience records and per-arm running statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::arm::Arm;
use super::context::TransactionContext;

/// One completed transaction as seen by the learner
///
/// Immutable once recorded. The experience store owns these; readers get
/// shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub context: TransactionContext,
    pub arm: Arm,
    /// Scalar quality signal in `[0, 1]`
    pub reward: f64,
    /// Whether the transport reported a successful delivery
    pub delivered: bool,
    pub latency_ms: f64,
    pub bytes_sent: u64,
    pub timestamp: DateTime<Utc>,
}

impl Experience {
    pub fn new(context: TransactionContext, arm: Arm, reward: f64) -> Self {
        Self {
            context,
            arm,
            reward,
            delivered: true,
            latency_ms: 0.0,
            bytes_sent: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_delivery(mut self, delivered: bool, latency_ms: f64, bytes_sent: u64) -> Self {
        self.delivered = delivered;
        self.latency_ms = latency_ms;
        self.bytes_sent = bytes_sent;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Running reward aggregates for one arm
///
/// Uses Welford's online algorithm for a numerically stable variance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ArmStatistics {
    pub pull_count: u64,
    pub mean_reward: f64,
    /// Sum of squared deviations from the mean
    pub m2: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl ArmStatistics {
    /// Fold one reward into the aggregates
    pub fn observe(&mut self, reward: f64, at: DateTime<Utc>) {
        self.pull_count += 1;
        let delta = reward - self.mean_reward;
        self.mean_reward += delta / self.pull_count as f64;
        let delta2 = reward - self.mean_reward;
        self.m2 += delta * delta2;
        self.last_update = Some(at);
    }

    /// Sample variance of the observed rewards (0 below two pulls)
    pub fn variance(&self) -> f64 {
        if self.pull_count < 2 {
            0.0
        } else {
            self.m2 / (self.pull_count - 1) as f64
        }
    }

    pub fn is_pulled(&self) -> bool {
        self.pull_count > 0
    }
}
