//! End-to-end scenarios for the adaptive core

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use paumiot_adaptive::config::AdaptiveConfig;
use paumiot_adaptive::distiller::label_experiences;
use paumiot_adaptive::{AdaptiveEngine, Delivery, ProtocolTransport, RebuildOutcome, SkipReason, TransactionState};
use paumiot_common::{Arm, DeviceType, TransactionContext, TransportError, MIN_REWARD};

/// Fast only on the arm that suits the device type and payload class
struct CorrelatedTransport;

impl CorrelatedTransport {
    fn best_arm(device_type: DeviceType, payload_len: u64) -> Arm {
        match (device_type, payload_len > 1024) {
            (DeviceType::Sensor, false) => Arm::Coap,
            (DeviceType::Sensor, true) => Arm::Mqtt,
            (_, false) => Arm::PriotpUnreliable,
            (_, true) => Arm::PriotpReliable,
        }
    }
}

#[async_trait]
impl ProtocolTransport for CorrelatedTransport {
    async fn send(&self, arm: Arm, device_id: &str, payload: &[u8]) -> Result<Delivery, TransportError> {
        let device_type = if device_id.starts_with("sensor") {
            DeviceType::Sensor
        } else {
            DeviceType::Camera
        };
        let latency_ms = if arm == Self::best_arm(device_type, payload.len() as u64) {
            2.0
        } else {
            200.0
        };
        Ok(Delivery {
            latency_ms,
            bytes_sent: arm.estimated_frame_bytes(payload.len() as u64),
        })
    }
}

struct HangingTransport;

#[async_trait]
impl ProtocolTransport for HangingTransport {
    async fn send(&self, _arm: Arm, _device_id: &str, _payload: &[u8]) -> Result<Delivery, TransportError> {
        std::future::pending().await
    }
}

fn config() -> AdaptiveConfig {
    let mut config = AdaptiveConfig::default();
    config.dispatch.seed = Some(42);
    config
}

fn correlated_engine(config: AdaptiveConfig) -> Arc<AdaptiveEngine> {
    Arc::new(
        AdaptiveEngine::builder(config)
            .transport(Arc::new(CorrelatedTransport))
            .build()
            .unwrap(),
    )
}

/// Cycle through four (device type, payload size) cells with everything
/// else held constant
fn transaction(i: usize) -> (TransactionContext, Vec<u8>) {
    let (device_id, device_type) = if i % 2 == 0 {
        ("sensor-1", DeviceType::Sensor)
    } else {
        ("camera-1", DeviceType::Camera)
    };
    let size = if (i / 2) % 2 == 0 { 64 } else { 4096 };
    let ctx = TransactionContext::new(device_id, device_type, size as u64)
        .with_battery(70)
        .with_time_bucket(3);
    (ctx, vec![0u8; size])
}

#[tokio::test]
async fn test_distillation_converges_on_correlated_features() {
    let engine = correlated_engine(config());

    let mut outcomes = Vec::new();
    for i in 0..1_000 {
        let (ctx, payload) = transaction(i);
        let report = engine.dispatcher().dispatch_with_context(ctx, &payload).await;
        assert_eq!(report.state, TransactionState::Completed);
        if i == 499 || i == 999 {
            outcomes.push(engine.rebuild_now());
        }
    }

    assert!(outcomes.iter().all(RebuildOutcome::is_published));
    let rl = engine.rl_stats();
    assert_eq!(rl.tree_version, 2);
    assert!(rl.distillation_accuracy > 0.9, "accuracy {}", rl.distillation_accuracy);
    assert_eq!(rl.bandit_pulls, 1_000);
    assert_eq!(rl.total_experiences, 1_000);
    assert_eq!(engine.protocol_stats().total(), 1_000);
}

#[tokio::test]
async fn test_tree_leaves_match_majority_labels() {
    let engine = correlated_engine(config());
    for i in 0..600 {
        let (ctx, payload) = transaction(i);
        engine.dispatcher().dispatch_with_context(ctx, &payload).await;
    }
    assert!(engine.rebuild_now().is_published());
    let tree = engine.distiller().current().unwrap();

    // Rebuild the labels from the same sample the distiller used.
    let sample = engine.store().recent(engine.config().distiller.sample_size);
    let labeled = label_experiences(&sample);

    let mut per_leaf: HashMap<usize, [usize; Arm::COUNT]> = HashMap::new();
    for (exp, row) in sample.iter().zip(&labeled) {
        per_leaf.entry(tree.leaf_id(&exp.context)).or_insert([0; Arm::COUNT])[row.label.index()] += 1;
    }

    for exp in &sample {
        let counts = per_leaf[&tree.leaf_id(&exp.context)];
        let mut majority = Arm::ALL[0];
        for arm in Arm::ALL {
            if counts[arm.index()] > counts[majority.index()] {
                majority = arm;
            }
        }
        assert_eq!(tree.recommend(&exp.context).arm, majority);
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_timeout_transport() {
    let mut config = config();
    config.dispatch.send_timeout_ms = 100;
    config.reward.failure_penalty = 0.05;
    let engine = AdaptiveEngine::builder(config)
        .transport(Arc::new(HangingTransport))
        .build()
        .unwrap();

    let report = engine.dispatch("sensor-7", b"{\"value\": 3}").await;
    assert_eq!(report.state, TransactionState::Failed);

    let protocols = engine.protocol_stats();
    assert_eq!(protocols.get(report.arm), 1);
    assert_eq!(protocols.total(), 1);

    let stats = engine.bandit().statistics(report.arm);
    assert_eq!(stats.pull_count, 1);
    assert!((stats.mean_reward - 0.05).abs() < 1e-12);
    assert!(stats.mean_reward >= MIN_REWARD);
    assert_eq!(engine.store().size(), 1);
}

#[tokio::test]
async fn test_versions_increase_and_skips_keep_version() {
    let mut config = config();
    config.distiller.min_samples_rebuild = 40;
    let engine = correlated_engine(config);

    assert_eq!(
        engine.rebuild_now(),
        RebuildOutcome::Skipped(SkipReason::InsufficientSamples {
            available: 0,
            required: 40
        })
    );
    assert_eq!(engine.rl_stats().tree_version, 0);

    for i in 0..40 {
        let (ctx, payload) = transaction(i);
        engine.dispatcher().dispatch_with_context(ctx, &payload).await;
    }
    let mut last = 0;
    for _ in 0..3 {
        assert!(engine.rebuild_now().is_published());
        let version = engine.rl_stats().tree_version;
        assert!(version > last);
        last = version;
    }
    assert_eq!(last, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_keeps_counts_consistent() {
    let mut config = config();
    config.distiller.rebuild_every = 50;
    config.distiller.min_samples_rebuild = 20;
    let engine = correlated_engine(config);
    let background = engine.spawn_background(None);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            for i in 0..100 {
                let (ctx, payload) = transaction(worker * 100 + i);
                engine.dispatcher().dispatch_with_context(ctx, &payload).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    background.shutdown();

    let snapshot = engine.bandit().snapshot();
    let pulls: u64 = snapshot.arms.iter().map(|s| s.pull_count).sum();
    assert_eq!(pulls, 800);
    assert_eq!(snapshot.total_pulls, 800);
    assert_eq!(engine.store().size(), 800);
    assert_eq!(engine.stats_snapshot().messages_total, 800);
    assert_eq!(engine.stats_snapshot().active_connections, 0);

    // Per-arm pulls agree with the recorded experiences.
    let mut recorded = [0u64; Arm::COUNT];
    for exp in engine.store().snapshot() {
        recorded[exp.arm.index()] += 1;
    }
    for arm in Arm::ALL {
        assert_eq!(recorded[arm.index()], snapshot.arms[arm.index()].pull_count);
        assert_eq!(recorded[arm.index()], engine.protocol_stats().get(arm));
    }
}
