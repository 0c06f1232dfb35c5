//! Reward shaping for completed transactions

use paumiot_common::{Arm, MAX_REWARD, MIN_REWARD};

use crate::config::RewardSettings;

/// Maps a transaction outcome to a scalar in `[MIN_REWARD, MAX_REWARD]`
///
/// Each term lies in `[0, 1]`:
/// - latency: `ref / (ref + latency)`, 0.5 at the reference latency
/// - success: 1 for a delivery
/// - bandwidth: `baseline / (baseline + bytes)`, 0.5 when on par with the
///   baseline protocol
///
/// The reward is their weighted mean. Failures score the configured
/// penalty regardless of the terms.
#[derive(Debug, Clone)]
pub struct RewardModel {
    settings: RewardSettings,
    weight_sum: f64,
}

impl RewardModel {
    pub fn new(settings: RewardSettings) -> Self {
        let weight_sum = settings.latency_weight + settings.success_weight + settings.bandwidth_weight;
        Self { settings, weight_sum }
    }

    pub fn baseline(&self) -> Arm {
        self.settings.baseline
    }

    /// Bytes the baseline protocol would need for `payload_len`
    pub fn baseline_bytes(&self, payload_len: u64) -> u64 {
        self.settings.baseline.estimated_frame_bytes(payload_len)
    }

    pub fn completed(&self, latency_ms: f64, bytes_sent: u64, payload_len: u64) -> f64 {
        if self.weight_sum <= 0.0 {
            return MIN_REWARD;
        }
        let s = &self.settings;
        let reference = s.latency_reference_ms;
        let latency = if latency_ms.is_finite() { latency_ms.max(0.0) } else { f64::MAX };
        let latency_term = reference / (reference + latency);

        let baseline = self.baseline_bytes(payload_len) as f64;
        let bytes = bytes_sent as f64;
        let bandwidth_term = if baseline + bytes > 0.0 {
            baseline / (baseline + bytes)
        } else {
            0.5
        };

        let reward = (s.latency_weight * latency_term + s.success_weight + s.bandwidth_weight * bandwidth_term)
            / self.weight_sum;
        reward.clamp(MIN_REWARD, MAX_REWARD)
    }

    pub fn failed(&self) -> f64 {
        self.settings.failure_penalty.clamp(MIN_REWARD, MAX_REWARD)
    }
}

impl Default for RewardModel {
    fn default() -> Self {
        Self::new(RewardSettings::default())
    }
}
