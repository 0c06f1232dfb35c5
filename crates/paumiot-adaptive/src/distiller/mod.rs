//! Policy distillation
//!
//! - [`features`]: numeric view of a context
//! - [`builder`]: labeling and tree induction
//! - [`tree`]: immutable published tree
//! - [`policy`]: rebuild, versioning and atomic publication
//! - [`scheduler`]: background trigger loop

pub mod builder;
pub mod features;
pub mod policy;
pub mod scheduler;
pub mod tree;

pub use builder::{label_experiences, LabeledSample, TreeBuilder};
pub use features::{feature_vector, ContextCell, Feature};
pub use policy::{DistillerStats, PolicyDistiller, RebuildOutcome, SkipReason};
pub use scheduler::spawn_rebuild_loop;
pub use tree::{DecisionTree, DecisionTreeNode, Recommendation};
