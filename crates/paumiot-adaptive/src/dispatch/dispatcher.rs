//! Per-transaction dispatch
//!
//! ```text
//! NEW -> ARM_SELECTED -> PROTOCOL_SENT -> COMPLETED | FAILED
//! ```
//!
//! Every transaction that reaches the transport, successful or not, leaves
//! exactly one experience, one bandit update and one stats increment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use paumiot_common::{Arm, DeviceProfile, DeviceType, Experience, TransactionContext, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use super::reward::RewardModel;
use super::transport::{Delivery, DeviceRegistry, ProtocolTransport};
use crate::bandit::UcbBandit;
use crate::config::DispatchSettings;
use crate::distiller::PolicyDistiller;
use crate::experience::ExperienceStore;
use crate::metering::{CoreMetrics, DispatchSample, StatsAggregator};

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    New,
    ArmSelected,
    ProtocolSent,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }
}

/// Which policy picked the arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Tree,
    Bandit,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub device_id: String,
    pub arm: Arm,
    pub source: DecisionSource,
    pub state: TransactionState,
    pub reward: f64,
    pub latency_ms: f64,
    pub bytes_sent: u64,
    /// Version of the tree published when the arm was chosen, 0 if none
    pub tree_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchReport {
    pub fn delivered(&self) -> bool {
        self.state == TransactionState::Completed
    }
}

/// Shared learning state the dispatcher reads and writes
#[derive(Clone)]
pub struct LearningComponents {
    pub bandit: Arc<UcbBandit>,
    pub store: Arc<ExperienceStore>,
    pub distiller: Arc<PolicyDistiller>,
    pub stats: Arc<StatsAggregator>,
}

/// Routes transactions over the tree fast path or the bandit
pub struct Dispatcher {
    learning: LearningComponents,
    transport: Arc<dyn ProtocolTransport>,
    registry: Arc<dyn DeviceRegistry>,
    reward: RewardModel,
    epsilon: f64,
    send_timeout: Duration,
    loss_decay: f64,
    rng: Mutex<StdRng>,
    /// Exponentially decayed failure rate per device
    loss: DashMap<String, f64>,
    rebuild_trigger: Arc<Notify>,
    metrics: Option<CoreMetrics>,
}

impl Dispatcher {
    pub fn new(
        learning: LearningComponents,
        transport: Arc<dyn ProtocolTransport>,
        registry: Arc<dyn DeviceRegistry>,
        settings: &DispatchSettings,
        reward: RewardModel,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            learning,
            transport,
            registry,
            reward,
            epsilon: settings.epsilon.clamp(0.0, 1.0),
            send_timeout: Duration::from_millis(settings.send_timeout_ms.max(1)),
            loss_decay: settings.loss_decay.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            loss: DashMap::new(),
            rebuild_trigger: Arc::new(Notify::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Notified each time enough new experiences accumulated for a rebuild
    pub fn rebuild_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.rebuild_trigger)
    }

    pub fn learning(&self) -> &LearningComponents {
        &self.learning
    }

    /// Current decayed loss rate for a device, 0 when never seen
    pub fn loss_rate(&self, device_id: &str) -> f64 {
        self.loss.get(device_id).map_or(0.0, |l| *l)
    }

    /// Build the context from the registry and dispatch
    pub async fn dispatch(&self, device_id: &str, payload: &[u8]) -> DispatchReport {
        let context = self.context_for(device_id, payload.len() as u64);
        self.dispatch_with_context(context, payload).await
    }

    pub fn context_for(&self, device_id: &str, payload_size: u64) -> TransactionContext {
        let profile = self
            .registry
            .lookup(device_id)
            .unwrap_or_else(|| DeviceProfile::new(device_id, DeviceType::Unknown));
        TransactionContext::from_profile(&profile, payload_size, self.loss_rate(device_id), Utc::now())
    }

    #[instrument(skip_all, fields(device_id = %context.device_id))]
    pub async fn dispatch_with_context(&self, context: TransactionContext, payload: &[u8]) -> DispatchReport {
        let _connection = self.learning.stats.connection();
        let mut state = TransactionState::New;

        // NEW -> ARM_SELECTED
        let tree = self.learning.distiller.current();
        let tree_version = tree.as_ref().map_or(0, |t| t.version());
        let (arm, source) = match tree {
            Some(tree) if !self.explore() => (tree.recommend(&context).arm, DecisionSource::Tree),
            _ => (self.learning.bandit.select(&context), DecisionSource::Bandit),
        };
        state = advance(state, TransactionState::ArmSelected);
        debug!(%arm, ?source, "Arm selected");

        // ARM_SELECTED -> PROTOCOL_SENT
        let started = Instant::now();
        let pending = PendingOutcome {
            dispatcher: self,
            context: &context,
            arm,
            source,
            tree_published: tree_version > 0,
            started,
            settled: false,
        };
        let sent = tokio::time::timeout(
            self.send_timeout,
            self.transport.send(arm, &context.device_id, payload),
        )
        .await;
        state = advance(state, TransactionState::ProtocolSent);

        let outcome: Result<Delivery, TransportError> = match sent {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
                limit_ms: self.send_timeout.as_millis() as u64,
            }),
        };

        // PROTOCOL_SENT -> COMPLETED | FAILED
        let payload_len = context.payload_size_bytes;
        let (reward, latency_ms, bytes_sent, error) = match &outcome {
            Ok(delivery) => {
                state = advance(state, TransactionState::Completed);
                (
                    self.reward.completed(delivery.latency_ms, delivery.bytes_sent, payload_len),
                    delivery.latency_ms,
                    delivery.bytes_sent,
                    None,
                )
            }
            Err(e) => {
                state = advance(state, TransactionState::Failed);
                warn!(%arm, error = %e, "Transport failed, recording penalty");
                (
                    self.reward.failed(),
                    started.elapsed().as_secs_f64() * 1_000.0,
                    arm.estimated_frame_bytes(payload_len),
                    Some(e.to_string()),
                )
            }
        };
        pending.settle(reward, error.is_none(), latency_ms, bytes_sent);

        DispatchReport {
            device_id: context.device_id,
            arm,
            source,
            state,
            reward,
            latency_ms,
            bytes_sent,
            tree_version,
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_outcome(
        &self,
        context: &TransactionContext,
        arm: Arm,
        source: DecisionSource,
        tree_published: bool,
        reward: f64,
        delivered: bool,
        latency_ms: f64,
        bytes_sent: u64,
    ) {
        let learning = &self.learning;
        learning.store.record(
            Experience::new(context.clone(), arm, reward).with_delivery(delivered, latency_ms, bytes_sent),
        );
        learning.bandit.update(arm, reward);
        learning.stats.record(&DispatchSample {
            device_id: &context.device_id,
            arm,
            delivered,
            latency_ms,
            bytes_used: bytes_sent,
            baseline_bytes: self.reward.baseline_bytes(context.payload_size_bytes),
            bandit_override: source == DecisionSource::Bandit && tree_published,
        });

        let failed = if delivered { 0.0 } else { 1.0 };
        let alpha = self.loss_decay;
        self.loss
            .entry(context.device_id.clone())
            .and_modify(|l| *l = (1.0 - alpha) * *l + alpha * failed)
            .or_insert(alpha * failed);

        if let Some(metrics) = &self.metrics {
            metrics.observe_dispatch(arm, delivered, latency_ms);
            metrics.experiences.set(learning.store.size() as i64);
        }

        if learning.distiller.note_experience() {
            self.rebuild_trigger.notify_one();
        }
    }

    /// Independent uniform draw against epsilon
    fn explore(&self) -> bool {
        self.epsilon > 0.0 && self.rng.lock().gen::<f64>() < self.epsilon
    }
}

/// Records the outcome of a sent transaction exactly once
///
/// Dropped unsettled when the caller abandons the dispatch mid-send; the
/// transaction is then recorded as failed.
struct PendingOutcome<'a> {
    dispatcher: &'a Dispatcher,
    context: &'a TransactionContext,
    arm: Arm,
    source: DecisionSource,
    tree_published: bool,
    started: Instant,
    settled: bool,
}

impl PendingOutcome<'_> {
    fn settle(mut self, reward: f64, delivered: bool, latency_ms: f64, bytes_sent: u64) {
        self.settled = true;
        self.dispatcher.record_outcome(
            self.context,
            self.arm,
            self.source,
            self.tree_published,
            reward,
            delivered,
            latency_ms,
            bytes_sent,
        );
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let elapsed = self.started.elapsed();
        let error = TransportError::Cancelled {
            elapsed_ms: elapsed.as_millis() as u64,
        };
        warn!(arm = %self.arm, device_id = %self.context.device_id, error = %error, "Dispatch abandoned, recording penalty");
        self.dispatcher.record_outcome(
            self.context,
            self.arm,
            self.source,
            self.tree_published,
            self.dispatcher.reward.failed(),
            false,
            elapsed.as_secs_f64() * 1_000.0,
            self.arm.estimated_frame_bytes(self.context.payload_size_bytes),
        );
    }
}

fn advance(from: TransactionState, to: TransactionState) -> TransactionState {
    debug_assert!(!from.is_terminal(), "transaction advanced past {from:?}");
    to
}
