//! Distilled decision tree
//!
//! A published tree is immutable; the distiller replaces it wholesale.

use chrono::{DateTime, Utc};
use paumiot_common::{Arm, PaumiotError, Result, TransactionContext};
use serde::{Deserialize, Serialize};

use super::features::Feature;

/// Node of the distilled policy
///
/// Splits send `value <= threshold` left and everything else right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionTreeNode {
    Leaf {
        recommended_arm: Arm,
        /// Fraction of the leaf's training samples carrying the majority label
        confidence: f64,
        samples: usize,
    },
    Split {
        feature: Feature,
        threshold: f64,
        left: Box<DecisionTreeNode>,
        right: Box<DecisionTreeNode>,
    },
}

impl DecisionTreeNode {
    pub fn leaf(recommended_arm: Arm, confidence: f64, samples: usize) -> Self {
        DecisionTreeNode::Leaf {
            recommended_arm,
            confidence,
            samples,
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            DecisionTreeNode::Leaf { .. } => 1,
            DecisionTreeNode::Split { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    /// Depth in edges; a lone leaf has depth 0
    pub fn depth(&self) -> usize {
        match self {
            DecisionTreeNode::Leaf { .. } => 0,
            DecisionTreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            DecisionTreeNode::Leaf { confidence, .. } => {
                if !(0.0..=1.0).contains(confidence) {
                    return Err(PaumiotError::Validation(format!(
                        "leaf confidence {confidence} outside [0, 1]"
                    )));
                }
                Ok(())
            }
            DecisionTreeNode::Split {
                threshold,
                left,
                right,
                ..
            } => {
                if !threshold.is_finite() {
                    return Err(PaumiotError::Validation("non-finite split threshold".into()));
                }
                left.validate()?;
                right.validate()
            }
        }
    }
}

/// Leaf reached for a context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub arm: Arm,
    pub confidence: f64,
}

/// Published tree snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: DecisionTreeNode,
    version: u64,
    node_count: usize,
    depth: usize,
    accuracy: f64,
    training_samples: usize,
    built_at: DateTime<Utc>,
}

impl DecisionTree {
    pub fn new(root: DecisionTreeNode, version: u64, accuracy: f64, training_samples: usize) -> Self {
        let node_count = root.node_count();
        let depth = root.depth();
        Self {
            root,
            version,
            node_count,
            depth,
            accuracy,
            training_samples,
            built_at: Utc::now(),
        }
    }

    /// Walk to the leaf for `ctx`
    pub fn recommend(&self, ctx: &TransactionContext) -> Recommendation {
        let mut node = &self.root;
        loop {
            match node {
                DecisionTreeNode::Leaf {
                    recommended_arm,
                    confidence,
                    ..
                } => {
                    return Recommendation {
                        arm: *recommended_arm,
                        confidence: *confidence,
                    }
                }
                DecisionTreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if feature.value(ctx) <= *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }

    /// Pre-order index of the leaf reached for `ctx`
    ///
    /// Two contexts share a leaf exactly when their ids are equal.
    pub fn leaf_id(&self, ctx: &TransactionContext) -> usize {
        let mut node = &self.root;
        let mut id = 0;
        loop {
            match node {
                DecisionTreeNode::Leaf { .. } => return id,
                DecisionTreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature.value(ctx) <= *threshold {
                        id += 1;
                        node = left.as_ref();
                    } else {
                        id += 1 + left.node_count();
                        node = right.as_ref();
                    }
                }
            }
        }
    }

    pub fn root(&self) -> &DecisionTreeNode {
        &self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Fraction of evaluation samples whose label matches their leaf
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn training_samples(&self) -> usize {
        self.training_samples
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Estimated resident size in bytes, proportional to node count
    pub fn memory_bytes(&self) -> u64 {
        (self.node_count * std::mem::size_of::<DecisionTreeNode>()) as u64
    }

    /// Structural check applied before a tree is published or restored
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(PaumiotError::Validation("tree version must be positive".into()));
        }
        if self.node_count != self.root.node_count() {
            return Err(PaumiotError::Validation(format!(
                "tree records {} nodes but holds {}",
                self.node_count,
                self.root.node_count()
            )));
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(PaumiotError::Validation("tree accuracy outside [0, 1]".into()));
        }
        self.root.validate()
    }
}
