//! Rolling dispatch statistics
//!
//! Lifetime counters are plain atomics; the messages/sec and latency window
//! lives behind its own small mutex so readers never block dispatch on
//! unrelated arms for long.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use paumiot_common::{Arm, ProtocolStats, SystemMetrics};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::StatsSettings;

/// One finished dispatch as seen by the aggregator
#[derive(Debug, Clone)]
pub struct DispatchSample<'a> {
    pub device_id: &'a str,
    pub arm: Arm,
    pub delivered: bool,
    pub latency_ms: f64,
    /// Bytes put on the wire by the chosen protocol
    pub bytes_used: u64,
    /// Estimated bytes the baseline protocol would have used
    pub baseline_bytes: u64,
    /// Bandit answered although a tree was published
    pub bandit_override: bool,
}

/// Read-only view of the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_total: u64,
    pub failures_total: u64,
    pub messages_per_second: f64,
    pub avg_latency_ms: f64,
    pub protocols: ProtocolStats,
    pub bandit_overrides: u64,
    pub bytes_used: u64,
    pub baseline_bytes: u64,
    pub bandwidth_savings: f64,
    pub active_devices: u64,
    pub active_connections: u64,
    pub uptime_seconds: u64,
}

struct WindowEntry {
    at: Instant,
    /// Latency of delivered messages only
    latency_ms: Option<f64>,
}

/// Counters written by the dispatcher and read by the REST facade
pub struct StatsAggregator {
    window: Duration,
    started: Instant,
    messages_total: AtomicU64,
    failures_total: AtomicU64,
    per_arm: [AtomicU64; Arm::COUNT],
    bandit_overrides: AtomicU64,
    bytes_used: AtomicU64,
    baseline_bytes: AtomicU64,
    active_connections: AtomicU64,
    recent: Mutex<VecDeque<WindowEntry>>,
    /// Last dispatch per device
    devices: DashMap<String, Instant>,
}

impl StatsAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_secs(1)),
            started: Instant::now(),
            messages_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            per_arm: Default::default(),
            bandit_overrides: AtomicU64::new(0),
            bytes_used: AtomicU64::new(0),
            baseline_bytes: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            devices: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &StatsSettings) -> Self {
        Self::new(Duration::from_secs(settings.window_secs))
    }

    /// Count one finished dispatch
    pub fn record(&self, sample: &DispatchSample<'_>) {
        self.record_at(sample, Instant::now());
    }

    pub fn record_at(&self, sample: &DispatchSample<'_>, now: Instant) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        self.per_arm[sample.arm.index()].fetch_add(1, Ordering::Relaxed);
        if !sample.delivered {
            self.failures_total.fetch_add(1, Ordering::Relaxed);
        }
        if sample.bandit_override {
            self.bandit_overrides.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_used.fetch_add(sample.bytes_used, Ordering::Relaxed);
        self.baseline_bytes.fetch_add(sample.baseline_bytes, Ordering::Relaxed);
        self.devices.insert(sample.device_id.to_string(), now);

        let mut recent = self.recent.lock();
        recent.push_back(WindowEntry {
            at: now,
            latency_ms: sample.delivered.then_some(sample.latency_ms),
        });
        self.prune(&mut recent, now);
        trace!(arm = %sample.arm, delivered = sample.delivered, "Dispatch counted");
    }

    /// Mark a transaction as in flight until the guard drops
    pub fn connection(&self) -> ConnectionGuard<'_> {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard(&self.active_connections)
    }

    pub fn protocol_stats(&self) -> ProtocolStats {
        let mut counts = [0u64; Arm::COUNT];
        for (slot, counter) in counts.iter_mut().zip(&self.per_arm) {
            *slot = counter.load(Ordering::Relaxed);
        }
        ProtocolStats::from_counts(counts)
    }

    pub fn bandit_overrides(&self) -> u64 {
        self.bandit_overrides.load(Ordering::Relaxed)
    }

    /// Fraction of baseline bytes saved, 0 before any traffic
    pub fn bandwidth_savings(&self) -> f64 {
        let baseline = self.baseline_bytes.load(Ordering::Relaxed);
        if baseline == 0 {
            return 0.0;
        }
        let used = self.bytes_used.load(Ordering::Relaxed);
        (baseline as f64 - used as f64) / baseline as f64
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        let (in_window, latency_sum, latency_n) = {
            let mut recent = self.recent.lock();
            self.prune(&mut recent, now);
            let (sum, n) = recent
                .iter()
                .filter_map(|e| e.latency_ms)
                .fold((0.0, 0u64), |(s, n), l| (s + l, n + 1));
            (recent.len(), sum, n)
        };

        let uptime = now.saturating_duration_since(self.started);
        // Before the first full window the rate is taken over the uptime.
        let span = uptime.min(self.window).as_secs_f64().max(1.0);
        // Devices silent for a whole window are forgotten.
        self.devices
            .retain(|_, seen| now.saturating_duration_since(*seen) <= self.window);
        let active_devices = self.devices.len() as u64;

        StatsSnapshot {
            messages_total: self.messages_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            messages_per_second: in_window as f64 / span,
            avg_latency_ms: if latency_n == 0 { 0.0 } else { latency_sum / latency_n as f64 },
            protocols: self.protocol_stats(),
            bandit_overrides: self.bandit_overrides(),
            bytes_used: self.bytes_used.load(Ordering::Relaxed),
            baseline_bytes: self.baseline_bytes.load(Ordering::Relaxed),
            bandwidth_savings: self.bandwidth_savings(),
            active_devices,
            active_connections: self.active_connections.load(Ordering::Relaxed),
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Dashboard view of the snapshot
    pub fn system_metrics(&self) -> SystemMetrics {
        let s = self.snapshot();
        SystemMetrics {
            messages_total: s.messages_total,
            messages_per_second: s.messages_per_second,
            avg_latency_ms: s.avg_latency_ms,
            active_devices: s.active_devices,
            active_connections: s.active_connections,
            uptime_seconds: s.uptime_seconds,
        }
    }

    fn prune(&self, recent: &mut VecDeque<WindowEntry>, now: Instant) {
        while let Some(front) = recent.front() {
            if now.saturating_duration_since(front.at) > self.window {
                recent.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::from_settings(&StatsSettings::default())
    }
}

/// Decrements the active-connection gauge on drop
pub struct ConnectionGuard<'a>(&'a AtomicU64);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(arm: Arm, delivered: bool, latency_ms: f64) -> DispatchSample<'static> {
        DispatchSample {
            device_id: "sensor-1",
            arm,
            delivered,
            latency_ms,
            bytes_used: 100,
            baseline_bytes: 400,
            bandit_override: false,
        }
    }

    #[test]
    fn test_counts_per_protocol() {
        let stats = StatsAggregator::default();
        stats.record(&sample(Arm::Mqtt, true, 10.0));
        stats.record(&sample(Arm::Mqtt, true, 20.0));
        stats.record(&sample(Arm::PriotpUnreliable, false, 2_000.0));

        let snap = stats.snapshot();
        assert_eq!(snap.messages_total, 3);
        assert_eq!(snap.failures_total, 1);
        assert_eq!(snap.protocols.mqtt, 2);
        assert_eq!(snap.protocols.priotp_unreliable, 1);
        assert_eq!(snap.protocols.total(), snap.messages_total);
        // Failed sends carry no latency sample.
        assert_eq!(snap.avg_latency_ms, 15.0);
        assert_eq!(snap.active_devices, 1);
    }

    #[test]
    fn test_bandwidth_savings() {
        let stats = StatsAggregator::default();
        assert_eq!(stats.bandwidth_savings(), 0.0);
        stats.record(&sample(Arm::Coap, true, 5.0));
        assert!((stats.bandwidth_savings() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_window_expires_old_entries() {
        let stats = StatsAggregator::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for _ in 0..20 {
            stats.record_at(&sample(Arm::Http, true, 40.0), t0);
        }

        let fresh = stats.snapshot_at(t0);
        assert!(fresh.messages_per_second > 0.0);

        let later = stats.snapshot_at(t0 + Duration::from_secs(30));
        assert_eq!(later.messages_per_second, 0.0);
        assert_eq!(later.avg_latency_ms, 0.0);
        assert_eq!(later.active_devices, 0);
        assert_eq!(later.messages_total, 20);
    }

    #[test]
    fn test_silent_devices_are_forgotten() {
        let stats = StatsAggregator::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for i in 0..50 {
            let device_id = format!("burst-{i}");
            stats.record_at(
                &DispatchSample {
                    device_id: &device_id,
                    arm: Arm::Mqtt,
                    delivered: true,
                    latency_ms: 5.0,
                    bytes_used: 100,
                    baseline_bytes: 400,
                    bandit_override: false,
                },
                t0,
            );
        }
        stats.record_at(&sample(Arm::Mqtt, true, 5.0), t0 + Duration::from_secs(25));
        assert_eq!(stats.devices.len(), 51);

        let snap = stats.snapshot_at(t0 + Duration::from_secs(30));
        assert_eq!(snap.active_devices, 1);
        assert_eq!(stats.devices.len(), 1);
        assert!(stats.devices.contains_key("sensor-1"));
    }

    #[test]
    fn test_connection_guard() {
        let stats = StatsAggregator::default();
        {
            let _a = stats.connection();
            let _b = stats.connection();
            assert_eq!(stats.snapshot().active_connections, 2);
        }
        assert_eq!(stats.snapshot().active_connections, 0);
    }

    #[test]
    fn test_overrides_counted() {
        let stats = StatsAggregator::default();
        let mut s = sample(Arm::Coap, true, 1.0);
        s.bandit_override = true;
        stats.record(&s);
        stats.record(&sample(Arm::Coap, true, 1.0));
        assert_eq!(stats.bandit_overrides(), 1);
    }
}
