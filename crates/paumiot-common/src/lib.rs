//! # PAUMIoT Common
//!
//! Shared types and errors for the PAUMIoT adaptive protocol core.
//!
//! ## Core Types
//!
//! - [`Arm`]: one of the five routable protocols
//! - [`TransactionContext`]: immutable per-transaction routing snapshot
//! - [`Experience`]: completed transaction (context, arm, reward)
//! - [`ArmStatistics`]: Welford running aggregates per arm
//!
//! ## Wire Shapes
//!
//! - [`ProtocolStats`], [`RlStats`], [`SystemMetrics`], [`SystemStatus`]:
//!   dashboard-facing REST responses
//! - [`Device`], [`SensorReading`], [`SensorDataPayload`]: registry and
//!   ingestion shapes

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{CheckpointError, PaumiotError, Result, TransportError};
pub use types::{
    api::{
        DevicesResponse, HealthResponse, HealthState, ProtocolStats, RlStats, SensorsResponse, SystemMetrics,
        SystemStatus,
    },
    arm::Arm,
    context::{time_bucket, TransactionContext, TIME_BUCKETS, TIME_BUCKET_HOURS},
    device::{Device, DeviceProfile, DeviceType, SensorDataPayload, SensorReading},
    experience::{ArmStatistics, Experience},
};

/// PAUMIoT version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reward assigned when nothing better is known
pub const MIN_REWARD: f64 = 0.0;

/// Upper bound of the reward scale
pub const MAX_REWARD: f64 = 1.0;
