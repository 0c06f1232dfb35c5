//! Bandit module
//!
//! Per-protocol reward estimation and UCB1 arm selection.

pub mod ucb;

pub use ucb::{BanditSnapshot, UcbBandit};
