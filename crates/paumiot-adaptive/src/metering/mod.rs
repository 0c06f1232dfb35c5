//! Metering module
//!
//! - StatsAggregator: counters and rolling windows behind the REST stats
//! - CoreMetrics: prometheus instrumentation

pub mod aggregator;
pub mod metrics;

pub use aggregator::{ConnectionGuard, DispatchSample, StatsAggregator, StatsSnapshot};
pub use metrics::CoreMetrics;
