//! Adaptive engine facade
//!
//! Owns every component of the core and wires them by explicit injection.
//! Callers hold one `Arc<AdaptiveEngine>` and never reach for globals.

use std::sync::Arc;
use std::time::Duration;

use paumiot_common::{PaumiotError, ProtocolStats, Result, RlStats, SystemMetrics};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bandit::UcbBandit;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::AdaptiveConfig;
use crate::dispatch::{
    DeviceRegistry, DispatchReport, Dispatcher, EmptyRegistry, LearningComponents, ProtocolTransport, RewardModel,
};
use crate::distiller::{spawn_rebuild_loop, PolicyDistiller, RebuildOutcome};
use crate::experience::ExperienceStore;
use crate::metering::{CoreMetrics, StatsAggregator, StatsSnapshot};

/// What startup recovered from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No usable checkpoint; all arms start unpulled and no tree is active
    Cold,
    Restored { total_pulls: u64, tree_version: u64 },
}

/// Builder for [`AdaptiveEngine`]
pub struct EngineBuilder {
    config: AdaptiveConfig,
    transport: Option<Arc<dyn ProtocolTransport>>,
    registry: Arc<dyn DeviceRegistry>,
    metrics: Option<CoreMetrics>,
    checkpoints: Option<CheckpointStore>,
}

impl EngineBuilder {
    pub fn transport(mut self, transport: Arc<dyn ProtocolTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn build(self) -> Result<AdaptiveEngine> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| PaumiotError::Config("a protocol transport is required".into()))?;

        let cfg = &self.config;
        let learning = LearningComponents {
            bandit: Arc::new(UcbBandit::from_settings(&cfg.bandit)),
            store: Arc::new(ExperienceStore::from_settings(&cfg.store)),
            distiller: Arc::new(PolicyDistiller::new(cfg.distiller.clone())),
            stats: Arc::new(StatsAggregator::from_settings(&cfg.stats)),
        };

        let mut dispatcher = Dispatcher::new(
            learning.clone(),
            transport,
            self.registry,
            &cfg.dispatch,
            RewardModel::new(cfg.reward.clone()),
        );
        if let Some(metrics) = &self.metrics {
            dispatcher = dispatcher.with_metrics(metrics.clone());
        }

        Ok(AdaptiveEngine {
            config: self.config,
            learning,
            dispatcher,
            metrics: self.metrics,
            checkpoints: self.checkpoints,
        })
    }
}

/// The adaptive protocol-selection core
pub struct AdaptiveEngine {
    config: AdaptiveConfig,
    learning: LearningComponents,
    dispatcher: Dispatcher,
    metrics: Option<CoreMetrics>,
    checkpoints: Option<CheckpointStore>,
}

impl AdaptiveEngine {
    pub fn builder(config: AdaptiveConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            transport: None,
            registry: Arc::new(EmptyRegistry),
            metrics: None,
            checkpoints: None,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn learning(&self) -> &LearningComponents {
        &self.learning
    }

    pub fn bandit(&self) -> &UcbBandit {
        &self.learning.bandit
    }

    pub fn store(&self) -> &ExperienceStore {
        &self.learning.store
    }

    pub fn distiller(&self) -> &PolicyDistiller {
        &self.learning.distiller
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Load the checkpoint if one is configured
    ///
    /// Any unreadable or inconsistent checkpoint falls back to a cold
    /// start; a bad tree alone is dropped while the bandit state is kept.
    pub fn restore(&self) -> RestoreOutcome {
        let Some(store) = &self.checkpoints else {
            return RestoreOutcome::Cold;
        };
        let checkpoint = match store.load() {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return RestoreOutcome::Cold,
            Err(e) => {
                warn!(error = %e, path = %store.path().display(), "Ignoring unreadable checkpoint, cold start");
                return RestoreOutcome::Cold;
            }
        };

        if let Err(e) = self.learning.bandit.restore(&checkpoint.bandit) {
            warn!(error = %e, "Ignoring inconsistent checkpoint, cold start");
            return RestoreOutcome::Cold;
        }

        let mut tree_version = 0;
        if let Some(tree) = checkpoint.tree {
            let version = tree.version();
            match self.learning.distiller.restore(tree) {
                Ok(()) => tree_version = version,
                Err(e) => warn!(error = %e, "Dropping invalid checkpointed tree"),
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.tree_version.set(tree_version as i64);
        }

        info!(
            total_pulls = checkpoint.bandit.total_pulls,
            tree_version,
            saved_at = %checkpoint.saved_at,
            "Restored learner state"
        );
        RestoreOutcome::Restored {
            total_pulls: checkpoint.bandit.total_pulls,
            tree_version,
        }
    }

    /// Route one payload for `device_id`
    pub async fn dispatch(&self, device_id: &str, payload: &[u8]) -> DispatchReport {
        self.dispatcher.dispatch(device_id, payload).await
    }

    /// Run a rebuild on the calling thread
    pub fn rebuild_now(&self) -> RebuildOutcome {
        let outcome = self.learning.distiller.rebuild(&self.learning.store);
        if let Some(metrics) = &self.metrics {
            metrics.observe_rebuild(&outcome);
        }
        outcome
    }

    /// Persist bandit statistics and the active tree
    pub fn checkpoint(&self) -> Result<()> {
        let store = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| PaumiotError::Config("no checkpoint path configured".into()))?;
        let tree = self.learning.distiller.current().map(|t| (*t).clone());
        store.save(&Checkpoint::new(self.learning.bandit.snapshot(), tree))?;
        Ok(())
    }

    pub fn protocol_stats(&self) -> ProtocolStats {
        self.learning.stats.protocol_stats()
    }

    pub fn system_metrics(&self) -> SystemMetrics {
        self.learning.stats.system_metrics()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.learning.stats.snapshot()
    }

    pub fn rl_stats(&self) -> RlStats {
        let distiller = self.learning.distiller.stats();
        let store = self.learning.store.stats();
        RlStats {
            tree_version: distiller.tree_version,
            tree_nodes: distiller.tree_nodes,
            distillation_accuracy: distiller.distillation_accuracy,
            tree_memory: distiller.tree_memory,
            bandit_pulls: self.learning.bandit.total_pulls(),
            bandit_overrides: self.learning.stats.bandit_overrides(),
            bandit_best_arm: self
                .learning
                .bandit
                .best_arm()
                .map_or_else(|| "none".to_string(), |arm| arm.as_str().to_string()),
            total_experiences: store.size as u64,
            significant_experiences: store.significant as u64,
            bandwidth_savings: self.learning.stats.bandwidth_savings(),
        }
    }

    /// Start the rebuild loop and, when configured, periodic checkpoints
    pub fn spawn_background(self: &Arc<Self>, checkpoint_every: Option<Duration>) -> BackgroundTasks {
        let mut handles = vec![spawn_rebuild_loop(
            Arc::clone(&self.learning.distiller),
            Arc::clone(&self.learning.store),
            self.dispatcher.rebuild_trigger(),
            self.metrics.clone(),
        )];

        if let (Some(period), Some(_)) = (checkpoint_every, &self.checkpoints) {
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let engine = Arc::clone(&engine);
                    match tokio::task::spawn_blocking(move || engine.checkpoint()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(error = %e, "Periodic checkpoint failed"),
                        Err(e) => error!(error = %e, "Checkpoint task failed"),
                    }
                }
            }));
        }

        BackgroundTasks { handles }
    }
}

/// Handles of the engine's background loops
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every loop; safe to call while a rebuild is running
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Delivery;
    use async_trait::async_trait;
    use paumiot_common::{Arm, TransportError};

    struct Instant5ms;

    #[async_trait]
    impl ProtocolTransport for Instant5ms {
        async fn send(&self, arm: Arm, _device_id: &str, payload: &[u8]) -> std::result::Result<Delivery, TransportError> {
            Ok(Delivery {
                latency_ms: 5.0,
                bytes_sent: arm.estimated_frame_bytes(payload.len() as u64),
            })
        }
    }

    fn engine(checkpoints: Option<CheckpointStore>) -> AdaptiveEngine {
        let mut config = AdaptiveConfig::default();
        config.distiller.min_samples_rebuild = 10;
        config.dispatch.seed = Some(1);
        let mut builder = AdaptiveEngine::builder(config).transport(Arc::new(Instant5ms));
        if let Some(store) = checkpoints {
            builder = builder.checkpoints(store);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_requires_transport() {
        assert!(AdaptiveEngine::builder(AdaptiveConfig::default()).build().is_err());
    }

    #[test]
    fn test_cold_stats_degrade_to_defaults() {
        let engine = engine(None);
        assert_eq!(engine.rl_stats(), RlStats::default());
        assert_eq!(engine.protocol_stats(), ProtocolStats::default());
        assert_eq!(engine.system_metrics().messages_total, 0);
        assert_eq!(engine.restore(), RestoreOutcome::Cold);
    }

    #[tokio::test]
    async fn test_rl_stats_after_traffic() {
        let engine = engine(None);
        for _ in 0..20 {
            engine.dispatch("s-1", b"21.5").await;
        }
        assert!(engine.rebuild_now().is_published());

        let rl = engine.rl_stats();
        assert_eq!(rl.tree_version, 1);
        assert!(rl.tree_nodes >= 1);
        assert!(rl.tree_memory > 0);
        assert_eq!(rl.bandit_pulls, 20);
        assert_eq!(rl.total_experiences, 20);
        assert_ne!(rl.bandit_best_arm, "none");
        // Every arm is smaller on the wire than the HTTP baseline or equal to it.
        assert!(rl.bandwidth_savings >= 0.0);
        assert_eq!(engine.protocol_stats().total(), 20);
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ckpt");

        let first = engine(Some(CheckpointStore::new(&path)));
        for _ in 0..30 {
            first.dispatch("s-1", b"21.5").await;
        }
        first.rebuild_now();
        first.rebuild_now();
        first.checkpoint().unwrap();

        let second = engine(Some(CheckpointStore::new(&path)));
        assert_eq!(
            second.restore(),
            RestoreOutcome::Restored {
                total_pulls: 30,
                tree_version: 2
            }
        );
        assert_eq!(second.bandit().snapshot(), first.bandit().snapshot());
        assert_eq!(second.distiller().version(), 2);
        // Experiences are a warm cache and start empty.
        assert_eq!(second.store().size(), 0);
    }

    #[test]
    fn test_garbage_checkpoint_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ckpt");
        std::fs::write(&path, b"not a checkpoint").unwrap();

        let engine = engine(Some(CheckpointStore::new(&path)));
        assert_eq!(engine.restore(), RestoreOutcome::Cold);
        assert_eq!(engine.bandit().total_pulls(), 0);
        assert!(engine.distiller().current().is_none());
    }

    #[test]
    fn test_checkpoint_without_path_is_config_error() {
        assert!(matches!(engine(None).checkpoint(), Err(PaumiotError::Config(_))));
    }
}
