//! Policy distiller: periodic rebuild and atomic publication of the tree
//!
//! Readers load the active tree through an `ArcSwapOption`; a rebuild
//! builds the whole tree off to the side and swaps the pointer once.
//! Trees still referenced by in-flight transactions stay alive until
//! their last `Arc` is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use paumiot_common::Result;
use tracing::{debug, info, instrument};

use super::builder::{accuracy, label_experiences, LabeledSample, TreeBuilder};
use super::tree::DecisionTree;
use crate::config::DistillerSettings;
use crate::experience::ExperienceStore;

/// Why a rebuild did not publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer experiences than the configured minimum
    InsufficientSamples { available: usize, required: usize },
    /// Another rebuild holds the writer slot
    InProgress,
}

/// Result of one rebuild attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RebuildOutcome {
    Published {
        version: u64,
        node_count: usize,
        accuracy: f64,
        samples: usize,
    },
    Skipped(SkipReason),
}

impl RebuildOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, RebuildOutcome::Published { .. })
    }
}

/// Point-in-time distiller counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistillerStats {
    pub tree_version: u64,
    pub tree_nodes: u64,
    pub tree_memory: u64,
    pub distillation_accuracy: f64,
    pub rebuilds: u64,
    pub skipped_rebuilds: u64,
    pub pending_experiences: u64,
}

/// Resets the in-progress flag when a rebuild ends, however it ends
struct RebuildGuard<'a>(&'a AtomicBool);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the active decision tree
pub struct PolicyDistiller {
    settings: DistillerSettings,
    active: ArcSwapOption<DecisionTree>,
    /// Highest version ever published or restored
    last_version: AtomicU64,
    rebuilding: AtomicBool,
    /// Experiences recorded since the last rebuild attempt
    pending: AtomicU64,
    last_rebuild: Mutex<Instant>,
    rebuilds: AtomicU64,
    skipped: AtomicU64,
}

impl PolicyDistiller {
    pub fn new(settings: DistillerSettings) -> Self {
        Self {
            settings,
            active: ArcSwapOption::from(None),
            last_version: AtomicU64::new(0),
            rebuilding: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            last_rebuild: Mutex::new(Instant::now()),
            rebuilds: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &DistillerSettings {
        &self.settings
    }

    /// Currently published tree, if any
    pub fn current(&self) -> Option<Arc<DecisionTree>> {
        self.active.load_full()
    }

    /// Version of the published tree, 0 before the first publication
    pub fn version(&self) -> u64 {
        self.active.load().as_ref().map_or(0, |t| t.version())
    }

    /// Count one new experience; true when the count-based trigger fires
    pub fn note_experience(&self) -> bool {
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        pending == self.settings.rebuild_every.max(1)
    }

    /// Whether either trigger is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        let pending = self.pending.load(Ordering::Acquire);
        if pending >= self.settings.rebuild_every.max(1) {
            return true;
        }
        let interval = Duration::from_secs(self.settings.rebuild_interval_secs);
        pending > 0 && now.duration_since(*self.last_rebuild.lock()) >= interval
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Distill the most recent experiences into a new tree and publish it
    ///
    /// Never blocks on a concurrent rebuild: a second caller gets
    /// `Skipped(InProgress)`. With too few samples the previous tree stays
    /// authoritative.
    #[instrument(skip(self, store))]
    pub fn rebuild(&self, store: &ExperienceStore) -> RebuildOutcome {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rebuild already in progress, trigger coalesced");
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return RebuildOutcome::Skipped(SkipReason::InProgress);
        }
        let _guard = RebuildGuard(&self.rebuilding);

        self.pending.store(0, Ordering::Release);
        *self.last_rebuild.lock() = Instant::now();

        let experiences = store.recent(self.settings.sample_size);
        let required = self.settings.min_samples_rebuild.max(1);
        if experiences.len() < required {
            debug!(available = experiences.len(), required, "Not enough experiences to rebuild");
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return RebuildOutcome::Skipped(SkipReason::InsufficientSamples {
                available: experiences.len(),
                required,
            });
        }

        let labeled = label_experiences(&experiences);
        let (train, holdout) = split_holdout(labeled, self.settings.holdout_fraction);

        let root = TreeBuilder::new(&self.settings).build(&train);
        let version = self.last_version.load(Ordering::Acquire) + 1;
        let provisional = DecisionTree::new(root, version, 0.0, train.len());

        let evaluation = if holdout.is_empty() { &train } else { &holdout };
        let acc = accuracy(evaluation, |s| recommend_features(&provisional, s));
        let tree = DecisionTree::new(provisional.root().clone(), version, acc, train.len());

        let node_count = tree.node_count();
        self.active.store(Some(Arc::new(tree)));
        self.last_version.store(version, Ordering::Release);
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        info!(
            version,
            node_count,
            accuracy = acc,
            samples = train.len(),
            holdout = holdout.len(),
            "Published distilled policy tree"
        );

        RebuildOutcome::Published {
            version,
            node_count,
            accuracy: acc,
            samples: train.len(),
        }
    }

    /// Install a checkpointed tree
    ///
    /// Later rebuilds continue numbering above the restored version.
    pub fn restore(&self, tree: DecisionTree) -> Result<()> {
        tree.validate()?;
        let version = tree.version();
        self.last_version.fetch_max(version, Ordering::AcqRel);
        self.active.store(Some(Arc::new(tree)));
        info!(version, "Restored distilled policy tree");
        Ok(())
    }

    pub fn stats(&self) -> DistillerStats {
        let tree = self.current();
        DistillerStats {
            tree_version: tree.as_ref().map_or(0, |t| t.version()),
            tree_nodes: tree.as_ref().map_or(0, |t| t.node_count() as u64),
            tree_memory: tree.as_ref().map_or(0, |t| t.memory_bytes()),
            distillation_accuracy: tree.as_ref().map_or(0.0, |t| t.accuracy()),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            skipped_rebuilds: self.skipped.load(Ordering::Relaxed),
            pending_experiences: self.pending.load(Ordering::Relaxed),
        }
    }
}

impl Default for PolicyDistiller {
    fn default() -> Self {
        Self::new(DistillerSettings::default())
    }
}

/// Route a labeled sample through the tree by its stored feature values
fn recommend_features(tree: &DecisionTree, sample: &LabeledSample) -> paumiot_common::Arm {
    use super::tree::DecisionTreeNode;

    let mut node = tree.root();
    loop {
        match node {
            DecisionTreeNode::Leaf { recommended_arm, .. } => return *recommended_arm,
            DecisionTreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                node = if sample.features[feature.index()] <= *threshold {
                    left.as_ref()
                } else {
                    right.as_ref()
                };
            }
        }
    }
}

/// Withhold every k-th sample, k = round(1 / fraction)
fn split_holdout(samples: Vec<LabeledSample>, fraction: f64) -> (Vec<LabeledSample>, Vec<LabeledSample>) {
    if fraction <= 0.0 || samples.len() < 2 {
        return (samples, Vec::new());
    }
    let every = (1.0 / fraction).round().max(2.0) as usize;
    let (mut train, mut holdout) = (Vec::new(), Vec::new());
    for (i, sample) in samples.into_iter().enumerate() {
        if i % every == every - 1 {
            holdout.push(sample);
        } else {
            train.push(sample);
        }
    }
    (train, holdout)
}
