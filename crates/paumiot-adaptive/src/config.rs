//! Adaptive core configuration

use paumiot_common::{Arm, PaumiotError, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the adaptive core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub store: StoreSettings,
    pub bandit: BanditSettings,
    pub distiller: DistillerSettings,
    pub dispatch: DispatchSettings,
    pub reward: RewardSettings,
    pub stats: StatsSettings,
}

impl AdaptiveConfig {
    /// Read a JSON config file; missing sections keep their defaults
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PaumiotError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity == 0 {
            return Err(PaumiotError::Config("store.capacity must be positive".into()));
        }
        if self.store.significance_threshold.is_nan() || self.store.significance_threshold < 0.0 {
            return Err(PaumiotError::Config(
                "store.significance_threshold must be non-negative".into(),
            ));
        }
        if !self.bandit.exploration.is_finite() || self.bandit.exploration < 0.0 {
            return Err(PaumiotError::Config("bandit.exploration must be a finite, non-negative number".into()));
        }
        if !(0.0..=1.0).contains(&self.dispatch.epsilon) {
            return Err(PaumiotError::Config("dispatch.epsilon must be within [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.dispatch.loss_decay) {
            return Err(PaumiotError::Config("dispatch.loss_decay must be within [0, 1]".into()));
        }
        if self.dispatch.send_timeout_ms == 0 {
            return Err(PaumiotError::Config("dispatch.send_timeout_ms must be positive".into()));
        }
        let d = &self.distiller;
        if d.max_depth == 0 || d.min_samples_leaf == 0 || d.sample_size == 0 {
            return Err(PaumiotError::Config(
                "distiller.max_depth, min_samples_leaf and sample_size must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&d.holdout_fraction) {
            return Err(PaumiotError::Config("distiller.holdout_fraction must be within [0, 1)".into()));
        }
        if !(0.0..=1.0).contains(&d.purity_threshold) {
            return Err(PaumiotError::Config("distiller.purity_threshold must be within [0, 1]".into()));
        }
        let w = &self.reward;
        let weights = [w.latency_weight, w.success_weight, w.bandwidth_weight];
        if weights.iter().any(|x| x.is_nan() || *x < 0.0) {
            return Err(PaumiotError::Config("reward weights must be non-negative".into()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(PaumiotError::Config("at least one reward weight must be positive".into()));
        }
        if w.latency_reference_ms.is_nan() || w.latency_reference_ms <= 0.0 {
            return Err(PaumiotError::Config("reward.latency_reference_ms must be positive".into()));
        }
        if self.stats.window_secs == 0 {
            return Err(PaumiotError::Config("stats.window_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Experience store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Ring buffer capacity
    pub capacity: usize,
    /// Absolute deviation from the arm's running mean that marks an
    /// experience as significant
    pub significance_threshold: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity: crate::DEFAULT_STORE_CAPACITY,
            significance_threshold: 0.25,
        }
    }
}

/// UCB1 settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditSettings {
    /// Exploration constant `c` in `mean + c * sqrt(ln N / n)`
    pub exploration: f64,
}

impl Default for BanditSettings {
    fn default() -> Self {
        Self {
            exploration: std::f64::consts::SQRT_2,
        }
    }
}

/// Policy distillation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillerSettings {
    /// Rebuild after this many new experiences
    pub rebuild_every: u64,
    /// Rebuild at least this often (seconds)
    pub rebuild_interval_secs: u64,
    /// Most recent experiences sampled per rebuild
    pub sample_size: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Below this many samples the rebuild is skipped
    pub min_samples_rebuild: usize,
    /// Stop splitting once a node's majority fraction reaches this
    pub purity_threshold: f64,
    /// Candidate thresholds evaluated per feature
    pub max_thresholds_per_feature: usize,
    /// Fraction of the sample withheld for accuracy measurement
    /// (0 = train-fit accuracy)
    pub holdout_fraction: f64,
}

impl Default for DistillerSettings {
    fn default() -> Self {
        Self {
            rebuild_every: 500,
            rebuild_interval_secs: 30,
            sample_size: 2_000,
            max_depth: crate::DEFAULT_MAX_TREE_DEPTH,
            min_samples_leaf: 5,
            min_samples_rebuild: 50,
            purity_threshold: 0.98,
            max_thresholds_per_feature: 16,
            holdout_fraction: 0.0,
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Probability of bypassing the tree and asking the bandit
    pub epsilon: f64,
    /// Upper bound on a single transport send
    pub send_timeout_ms: u64,
    /// Weight of the newest outcome in the per-device loss rate
    pub loss_decay: f64,
    /// Seed for the exploration draw (entropy when unset)
    pub seed: Option<u64>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            epsilon: crate::DEFAULT_EPSILON,
            send_timeout_ms: 2_000,
            loss_decay: 0.2,
            seed: None,
        }
    }
}

/// Reward weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    pub latency_weight: f64,
    pub success_weight: f64,
    pub bandwidth_weight: f64,
    /// Latency that scores exactly 0.5 on the latency term
    pub latency_reference_ms: f64,
    /// Reward recorded for failed deliveries
    pub failure_penalty: f64,
    /// Protocol the bandwidth term and savings are measured against
    pub baseline: Arm,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            latency_weight: 0.4,
            success_weight: 0.4,
            bandwidth_weight: 0.2,
            latency_reference_ms: 50.0,
            failure_penalty: paumiot_common::MIN_REWARD,
            baseline: Arm::Http,
        }
    }
}

/// Stats aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// Sliding window for messages/sec and average latency
    pub window_secs: u64,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self { window_secs: 60 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AdaptiveConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_epsilon() {
        let mut cfg = AdaptiveConfig::default();
        cfg.dispatch.epsilon = 1.5;
        assert!(matches!(cfg.validate(), Err(PaumiotError::Config(_))));
    }

    #[test]
    fn test_rejects_nan_and_negative_values() {
        let mut cfg = AdaptiveConfig::default();
        cfg.store.significance_threshold = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = AdaptiveConfig::default();
        cfg.bandit.exploration = -0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = AdaptiveConfig::default();
        cfg.reward.bandwidth_weight = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = AdaptiveConfig::default();
        cfg.reward.latency_reference_ms = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_weights() {
        let mut cfg = AdaptiveConfig::default();
        cfg.reward.latency_weight = 0.0;
        cfg.reward.success_weight = 0.0;
        cfg.reward.bandwidth_weight = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: AdaptiveConfig =
            serde_json::from_str(r#"{"store": {"capacity": 32}, "dispatch": {"epsilon": 0.1}}"#)
                .unwrap();
        assert_eq!(cfg.store.capacity, 32);
        assert_eq!(cfg.dispatch.epsilon, 0.1);
        assert_eq!(cfg.distiller, DistillerSettings::default());
    }

    #[test]
    fn test_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"bandit": {"exploration": 0.5}}"#).unwrap();
        assert_eq!(AdaptiveConfig::from_file(&good).unwrap().bandit.exploration, 0.5);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"store": {"capacity": 0}}"#).unwrap();
        assert!(AdaptiveConfig::from_file(&bad).is_err());
        assert!(AdaptiveConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
