//! REST response shapes consumed by the dashboard
//!
//! Each endpoint gets its own closed struct; every field is required on
//! the wire and defaults to zero when the core has nothing to report.

use serde::{Deserialize, Serialize};

use super::arm::Arm;
use super::device::{Device, SensorReading};

/// `GET /api/v1/protocols/stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub mqtt: u64,
    pub coap: u64,
    pub http: u64,
    pub priotp_reliable: u64,
    pub priotp_unreliable: u64,
}

impl ProtocolStats {
    /// Build from counters indexed by [`Arm::index`]
    pub fn from_counts(counts: [u64; Arm::COUNT]) -> Self {
        Self {
            mqtt: counts[Arm::Mqtt.index()],
            coap: counts[Arm::Coap.index()],
            http: counts[Arm::Http.index()],
            priotp_reliable: counts[Arm::PriotpReliable.index()],
            priotp_unreliable: counts[Arm::PriotpUnreliable.index()],
        }
    }

    pub fn get(&self, arm: Arm) -> u64 {
        match arm {
            Arm::Mqtt => self.mqtt,
            Arm::Coap => self.coap,
            Arm::Http => self.http,
            Arm::PriotpReliable => self.priotp_reliable,
            Arm::PriotpUnreliable => self.priotp_unreliable,
        }
    }

    pub fn total(&self) -> u64 {
        Arm::ALL.iter().map(|arm| self.get(*arm)).sum()
    }
}

/// `GET /api/v1/rl/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RlStats {
    pub tree_version: u64,
    pub tree_nodes: u64,
    pub distillation_accuracy: f64,
    /// Estimated tree footprint in bytes
    pub tree_memory: u64,
    pub bandit_pulls: u64,
    /// Transactions routed by the bandit while a tree was published
    pub bandit_overrides: u64,
    /// Arm name, or `"none"` before the first pull
    pub bandit_best_arm: String,
    pub total_experiences: u64,
    pub significant_experiences: u64,
    pub bandwidth_savings: f64,
}

impl Default for RlStats {
    fn default() -> Self {
        Self {
            tree_version: 0,
            tree_nodes: 0,
            distillation_accuracy: 0.0,
            tree_memory: 0,
            bandit_pulls: 0,
            bandit_overrides: 0,
            bandit_best_arm: "none".to_string(),
            total_experiences: 0,
            significant_experiences: 0,
            bandwidth_savings: 0.0,
        }
    }
}

/// `GET /api/v1/metrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub messages_total: u64,
    pub messages_per_second: f64,
    pub avg_latency_ms: f64,
    pub active_devices: u64,
    pub active_connections: u64,
    pub uptime_seconds: u64,
}

/// `GET /api/v1/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub version: String,
    pub uptime: u64,
    pub devices: u64,
    pub sensors: u64,
}

/// `GET /api/v1/devices`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<Device>,
}

/// `GET /api/v1/sensors`, newest reading first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorsResponse {
    pub readings: Vec<SensorReading>,
}

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
}
