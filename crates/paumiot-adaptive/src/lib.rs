//! # PAUMIoT Adaptive Core
//!
//! Online protocol selection for IoT transactions.
//!
//! ## Architecture
//!
//! ```text
//!                 +-------------------+
//!   payload ----> |    Dispatcher     | ---- send ----> ProtocolTransport
//!                 +-------------------+
//!                   |  1-eps     | eps / no tree
//!                   v            v
//!          +-----------+   +------------+
//!          | Decision  |   | UCB1       |<---- update (every dispatch)
//!          | Tree      |   | Bandit     |
//!          +-----------+   +------------+
//!                ^                         record
//!                | publish (ArcSwap)   +-----------------+
//!          +-----------------+  <----- | ExperienceStore |
//!          | PolicyDistiller |  sample +-----------------+
//!          +-----------------+
//!
//!   StatsAggregator: counters updated once per dispatch
//! ```
//!
//! ## Reward
//!
//! ```text
//! r = (w_lat * ref / (ref + latency) + w_ok + w_bw * base / (base + bytes)) / sum(w)
//! ```
//!
//! Failed or timed-out sends record the configured penalty instead.

pub mod bandit;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod distiller;
pub mod engine;
pub mod experience;
pub mod metering;

pub use bandit::{BanditSnapshot, UcbBandit};
pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_FORMAT};
pub use config::AdaptiveConfig;
pub use dispatch::{
    DecisionSource, Delivery, DeviceRegistry, DispatchReport, Dispatcher, ProtocolTransport, TransactionState,
};
pub use distiller::{DecisionTree, DecisionTreeNode, PolicyDistiller, RebuildOutcome, SkipReason};
pub use engine::{AdaptiveEngine, BackgroundTasks, EngineBuilder, RestoreOutcome};
pub use experience::{ExperienceStore, StoreStats};
pub use metering::{CoreMetrics, StatsAggregator, StatsSnapshot};

/// Default experience ring capacity
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Default maximum depth of the distilled tree
pub const DEFAULT_MAX_TREE_DEPTH: usize = 6;

/// Default probability of routing through the bandit while a tree is active
pub const DEFAULT_EPSILON: f64 = 0.05;
