//! Tree induction over labeled experiences
//!
//! Labels come from grouping experiences into [`ContextCell`]s and taking
//! the arm with the best mean reward in each cell. The tree is then grown
//! top-down, choosing at every node the feature/threshold pair with the
//! highest information gain over those labels.

use std::collections::HashMap;
use std::sync::Arc;

use paumiot_common::{Arm, Experience};

use super::features::{feature_vector, ContextCell, Feature};
use super::tree::DecisionTreeNode;
use crate::config::DistillerSettings;

/// Smallest information gain worth a split
const MIN_GAIN: f64 = 1e-9;

/// One training row
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: [f64; Feature::COUNT],
    /// Best-performing arm for the sample's context cell
    pub label: Arm,
}

/// Label every experience with the best arm observed in its context cell
///
/// Only arms actually observed in a cell compete; ties go to the lowest
/// arm index. Output order matches input order.
pub fn label_experiences(experiences: &[Arc<Experience>]) -> Vec<LabeledSample> {
    let mut cells: HashMap<ContextCell, [(f64, u64); Arm::COUNT]> = HashMap::new();
    for exp in experiences {
        let sums = cells
            .entry(ContextCell::of(&exp.context))
            .or_insert([(0.0, 0); Arm::COUNT]);
        let slot = &mut sums[exp.arm.index()];
        slot.0 += exp.reward;
        slot.1 += 1;
    }

    let labels: HashMap<ContextCell, Arm> = cells
        .into_iter()
        .map(|(cell, sums)| (cell, best_mean_arm(&sums)))
        .collect();

    experiences
        .iter()
        .map(|exp| {
            let cell = ContextCell::of(&exp.context);
            LabeledSample {
                features: feature_vector(&exp.context),
                label: labels.get(&cell).copied().unwrap_or(exp.arm),
            }
        })
        .collect()
}

fn best_mean_arm(sums: &[(f64, u64); Arm::COUNT]) -> Arm {
    let mut best: Option<(Arm, f64)> = None;
    for arm in Arm::ALL {
        let (sum, count) = sums[arm.index()];
        if count == 0 {
            continue;
        }
        let mean = sum / count as f64;
        match best {
            Some((_, m)) if mean <= m => {}
            _ => best = Some((arm, mean)),
        }
    }
    best.map(|(arm, _)| arm).unwrap_or(Arm::ALL[0])
}

/// Label histogram of a node
#[derive(Debug, Clone, Copy, Default)]
struct LabelCounts([usize; Arm::COUNT]);

impl LabelCounts {
    fn of(samples: &[LabeledSample], indices: &[usize]) -> Self {
        let mut counts = Self::default();
        for &i in indices {
            counts.add(samples[i].label);
        }
        counts
    }

    fn add(&mut self, arm: Arm) {
        self.0[arm.index()] += 1;
    }

    fn remove(&mut self, arm: Arm) {
        self.0[arm.index()] -= 1;
    }

    fn total(&self) -> usize {
        self.0.iter().sum()
    }

    /// Majority label, ties to the lowest arm index
    fn majority(&self) -> (Arm, usize) {
        let mut best = (Arm::ALL[0], 0);
        for arm in Arm::ALL {
            let count = self.0[arm.index()];
            if count > best.1 {
                best = (arm, count);
            }
        }
        best
    }

    fn entropy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        self.0
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.log2()
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: Feature,
    threshold: f64,
    gain: f64,
}

/// Grows a [`DecisionTreeNode`] from labeled samples
pub struct TreeBuilder {
    max_depth: usize,
    min_samples_leaf: usize,
    purity_threshold: f64,
    max_thresholds: usize,
}

impl TreeBuilder {
    pub fn new(settings: &DistillerSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            min_samples_leaf: settings.min_samples_leaf.max(1),
            purity_threshold: settings.purity_threshold,
            max_thresholds: settings.max_thresholds_per_feature.max(1),
        }
    }

    /// Build a tree; `samples` must be non-empty
    pub fn build(&self, samples: &[LabeledSample]) -> DecisionTreeNode {
        let indices: Vec<usize> = (0..samples.len()).collect();
        self.grow(samples, indices, 0)
    }

    fn grow(&self, samples: &[LabeledSample], indices: Vec<usize>, depth: usize) -> DecisionTreeNode {
        let counts = LabelCounts::of(samples, &indices);
        let n = counts.total();
        let (majority, majority_count) = counts.majority();
        let purity = if n == 0 { 0.0 } else { majority_count as f64 / n as f64 };
        let leaf = || DecisionTreeNode::leaf(majority, purity, n);

        if depth >= self.max_depth || purity >= self.purity_threshold || n < 2 * self.min_samples_leaf {
            return leaf();
        }

        let Some(split) = self.best_split(samples, &indices, &counts) else {
            return leaf();
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| samples[i].features[split.feature.index()] <= split.threshold);

        DecisionTreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(samples, left, depth + 1)),
            right: Box::new(self.grow(samples, right, depth + 1)),
        }
    }

    fn best_split(
        &self,
        samples: &[LabeledSample],
        indices: &[usize],
        parent: &LabelCounts,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let parent_entropy = parent.entropy();
        let mut best: Option<SplitCandidate> = None;

        for feature in Feature::ALL {
            let f = feature.index();
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| samples[a].features[f].total_cmp(&samples[b].features[f]));

            // Positions `p` where order[p] and order[p + 1] differ in value,
            // respecting the leaf minimum on both sides.
            let boundaries: Vec<usize> = (self.min_samples_leaf - 1..n.saturating_sub(self.min_samples_leaf))
                .filter(|&p| samples[order[p]].features[f] < samples[order[p + 1]].features[f])
                .collect();
            if boundaries.is_empty() {
                continue;
            }
            let candidates = thin_out(&boundaries, self.max_thresholds);

            let mut left = LabelCounts::default();
            let mut right = *parent;
            let mut cursor = 0;
            for &p in &candidates {
                while cursor <= p {
                    let label = samples[order[cursor]].label;
                    left.add(label);
                    right.remove(label);
                    cursor += 1;
                }
                let nl = left.total() as f64;
                let nr = right.total() as f64;
                let gain = parent_entropy
                    - (nl / n as f64) * left.entropy()
                    - (nr / n as f64) * right.entropy();

                if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain) {
                    let lo = samples[order[p]].features[f];
                    let hi = samples[order[p + 1]].features[f];
                    best = Some(SplitCandidate {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Keep at most `max` evenly spaced entries, preserving order
fn thin_out(positions: &[usize], max: usize) -> Vec<usize> {
    if positions.len() <= max {
        return positions.to_vec();
    }
    let step = positions.len() as f64 / max as f64;
    let mut picked: Vec<usize> = (0..max)
        .map(|i| positions[((i as f64 + 0.5) * step) as usize])
        .collect();
    picked.dedup();
    picked
}

/// Fraction of samples whose label matches `predict`
pub fn accuracy<F>(samples: &[LabeledSample], predict: F) -> f64
where
    F: Fn(&LabeledSample) -> Arm,
{
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples.iter().filter(|s| predict(s) == s.label).count();
    hits as f64 / samples.len() as f64
}
