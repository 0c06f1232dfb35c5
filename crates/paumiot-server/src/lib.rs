//! # PAUMIoT Server
//!
//! HTTP facade over the adaptive protocol-selection core.
//!
//! ## Architecture
//!
//! ```text
//! POST /api/sensor/data
//!         |
//!         v
//! +----------------+   observe    +------------------------+
//! |   api router   | -----------> | InMemoryDeviceRegistry |
//! +----------------+              +------------------------+
//!         | dispatch                        ^ lookup
//!         v                                 |
//! +----------------+     send     +--------------------+
//! | AdaptiveEngine | -----------> | SimulatedTransport |
//! +----------------+              +--------------------+
//!         |
//!         v
//! GET /api/v1/{metrics, protocols/stats, rl/stats}, /metrics
//! ```

pub mod api;
pub mod config;
pub mod registry;
pub mod transport;

use std::sync::Arc;

use anyhow::Result;
use paumiot_adaptive::{AdaptiveEngine, CheckpointStore, CoreMetrics};
use prometheus::Registry;

pub use api::{router, AppState};
pub use config::{ServerConfig, SimulationSettings};
pub use registry::InMemoryDeviceRegistry;
pub use transport::SimulatedTransport;

/// Server version
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire the engine, registry and metrics registry from configuration
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let prometheus = Registry::new();
    let metrics = CoreMetrics::new()?;
    metrics.register(&prometheus)?;

    let registry = Arc::new(InMemoryDeviceRegistry::new(config.sensor_history));
    let mut builder = AdaptiveEngine::builder(config.adaptive.clone())
        .transport(Arc::new(SimulatedTransport::new(config.simulation.clone())))
        .registry(registry.clone())
        .metrics(metrics);
    if let Some(path) = &config.checkpoint_path {
        builder = builder.checkpoints(CheckpointStore::new(path));
    }
    let engine = Arc::new(builder.build()?);

    Ok(Arc::new(AppState::new(engine, registry, prometheus)))
}
