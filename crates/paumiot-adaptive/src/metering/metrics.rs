//! Prometheus instrumentation for the adaptive core

use paumiot_common::Arm;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::distiller::RebuildOutcome;

/// Prometheus metrics for dispatch and distillation
#[derive(Clone)]
pub struct CoreMetrics {
    pub dispatch_total: IntCounterVec,
    pub dispatch_failures: IntCounterVec,
    pub dispatch_latency_seconds: Histogram,
    pub tree_rebuilds: IntCounter,
    pub tree_rebuilds_skipped: IntCounter,
    pub tree_version: IntGauge,
    pub experiences: IntGauge,
}

impl CoreMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            dispatch_total: IntCounterVec::new(
                Opts::new("paumiot_dispatch_total", "Transactions dispatched per protocol"),
                &["protocol"],
            )?,
            dispatch_failures: IntCounterVec::new(
                Opts::new(
                    "paumiot_dispatch_failures_total",
                    "Failed or timed-out deliveries per protocol",
                ),
                &["protocol"],
            )?,
            dispatch_latency_seconds: Histogram::with_opts(
                HistogramOpts::new("paumiot_dispatch_latency_seconds", "Observed delivery latency")
                    .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            )?,
            tree_rebuilds: IntCounter::new("paumiot_tree_rebuilds_total", "Published policy trees")?,
            tree_rebuilds_skipped: IntCounter::new(
                "paumiot_tree_rebuilds_skipped_total",
                "Rebuild attempts that did not publish",
            )?,
            tree_version: IntGauge::new("paumiot_tree_version", "Version of the active policy tree")?,
            experiences: IntGauge::new("paumiot_experiences", "Experiences held in the store")?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.dispatch_total.clone()))?;
        registry.register(Box::new(self.dispatch_failures.clone()))?;
        registry.register(Box::new(self.dispatch_latency_seconds.clone()))?;
        registry.register(Box::new(self.tree_rebuilds.clone()))?;
        registry.register(Box::new(self.tree_rebuilds_skipped.clone()))?;
        registry.register(Box::new(self.tree_version.clone()))?;
        registry.register(Box::new(self.experiences.clone()))?;
        Ok(())
    }

    pub fn observe_dispatch(&self, arm: Arm, delivered: bool, latency_ms: f64) {
        self.dispatch_total.with_label_values(&[arm.as_str()]).inc();
        if delivered {
            self.dispatch_latency_seconds.observe(latency_ms / 1_000.0);
        } else {
            self.dispatch_failures.with_label_values(&[arm.as_str()]).inc();
        }
    }

    pub fn observe_rebuild(&self, outcome: &RebuildOutcome) {
        match outcome {
            RebuildOutcome::Published { version, .. } => {
                self.tree_rebuilds.inc();
                self.tree_version.set(*version as i64);
            }
            RebuildOutcome::Skipped(_) => self.tree_rebuilds_skipped.inc(),
        }
    }
}
