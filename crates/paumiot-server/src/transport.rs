//! Simulated protocol transport
//!
//! Stands in for the MQTT, CoAP, HTTP and PRIoTP codecs. Each protocol has
//! a latency and loss profile that shifts with payload size, so different
//! arms win for different traffic.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use paumiot_adaptive::{Delivery, ProtocolTransport};
use paumiot_common::{Arm, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::SimulationSettings;

/// Latency and loss characteristics of one protocol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolProfile {
    pub base_latency_ms: f64,
    /// Added per KiB of payload
    pub latency_per_kib_ms: f64,
    pub jitter_ms: f64,
    pub base_loss: f64,
    /// Added per KiB of payload
    pub loss_per_kib: f64,
}

impl ProtocolProfile {
    pub const fn of(arm: Arm) -> Self {
        match arm {
            Arm::Mqtt => Self {
                base_latency_ms: 12.0,
                latency_per_kib_ms: 1.5,
                jitter_ms: 4.0,
                base_loss: 0.005,
                loss_per_kib: 0.0,
            },
            Arm::Coap => Self {
                base_latency_ms: 6.0,
                latency_per_kib_ms: 6.0,
                jitter_ms: 3.0,
                base_loss: 0.02,
                loss_per_kib: 0.01,
            },
            Arm::Http => Self {
                base_latency_ms: 35.0,
                latency_per_kib_ms: 1.0,
                jitter_ms: 10.0,
                base_loss: 0.002,
                loss_per_kib: 0.0,
            },
            Arm::PriotpReliable => Self {
                base_latency_ms: 9.0,
                latency_per_kib_ms: 2.0,
                jitter_ms: 3.0,
                base_loss: 0.003,
                loss_per_kib: 0.0,
            },
            Arm::PriotpUnreliable => Self {
                base_latency_ms: 4.0,
                latency_per_kib_ms: 1.0,
                jitter_ms: 2.0,
                base_loss: 0.03,
                loss_per_kib: 0.04,
            },
        }
    }

    fn latency_ms(&self, kib: f64, jitter: f64) -> f64 {
        (self.base_latency_ms + self.latency_per_kib_ms * kib + self.jitter_ms * jitter).max(0.1)
    }

    fn loss(&self, kib: f64) -> f64 {
        (self.base_loss + self.loss_per_kib * kib).clamp(0.0, 1.0)
    }
}

/// Transport that draws latency and loss from per-protocol profiles
pub struct SimulatedTransport {
    settings: SimulationSettings,
    rng: Mutex<StdRng>,
}

impl SimulatedTransport {
    pub fn new(settings: SimulationSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            rng: Mutex::new(rng),
        }
    }

    /// Draw one outcome without waiting
    fn sample(&self, arm: Arm, payload_len: usize) -> (f64, bool) {
        let profile = ProtocolProfile::of(arm);
        let kib = payload_len as f64 / 1024.0;
        let (jitter, roll) = {
            let mut rng = self.rng.lock();
            (rng.gen_range(-1.0..=1.0), rng.gen::<f64>())
        };
        let latency = profile.latency_ms(kib, jitter) * self.settings.latency_scale.max(0.0);
        let lost = roll < (profile.loss(kib) * self.settings.loss_scale.max(0.0)).min(1.0);
        (latency, lost)
    }
}

#[async_trait]
impl ProtocolTransport for SimulatedTransport {
    async fn send(&self, arm: Arm, device_id: &str, payload: &[u8]) -> Result<Delivery, TransportError> {
        let (latency_ms, lost) = self.sample(arm, payload.len());
        if self.settings.real_delay {
            tokio::time::sleep(Duration::from_secs_f64(latency_ms / 1_000.0)).await;
        }
        trace!(%arm, device_id, latency_ms, lost, "Simulated send");

        if lost {
            return Err(TransportError::Rejected(format!("{arm} frame lost")));
        }
        Ok(Delivery {
            latency_ms,
            bytes_sent: arm.estimated_frame_bytes(payload.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(loss_scale: f64) -> SimulatedTransport {
        SimulatedTransport::new(SimulationSettings {
            loss_scale,
            real_delay: false,
            seed: Some(3),
            ..SimulationSettings::default()
        })
    }

    #[tokio::test]
    async fn test_lossless_delivery_reports_frame_bytes() {
        let transport = transport(0.0);
        for arm in Arm::ALL {
            let delivery = transport.send(arm, "d", &[0u8; 100]).await.unwrap();
            assert_eq!(delivery.bytes_sent, arm.estimated_frame_bytes(100));
            assert!(delivery.latency_ms > 0.0);
        }
    }

    #[tokio::test]
    async fn test_saturated_loss_always_fails() {
        let transport = transport(1_000.0);
        let err = transport.send(Arm::PriotpUnreliable, "d", &[0u8; 8]).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[test]
    fn test_profiles_favor_different_arms() {
        let small = |arm: Arm| ProtocolProfile::of(arm).latency_ms(0.05, 0.0);
        let large = |arm: Arm| ProtocolProfile::of(arm).loss(16.0);
        assert!(small(Arm::PriotpUnreliable) < small(Arm::Http));
        assert!(large(Arm::PriotpUnreliable) > large(Arm::PriotpReliable));
    }

    #[tokio::test]
    async fn test_seeded_runs_repeat() {
        let a = transport(1.0);
        let b = transport(1.0);
        for _ in 0..20 {
            let x = a.send(Arm::Coap, "d", &[0u8; 512]).await;
            let y = b.send(Arm::Coap, "d", &[0u8; 512]).await;
            assert_eq!(x, y);
        }
    }
}
