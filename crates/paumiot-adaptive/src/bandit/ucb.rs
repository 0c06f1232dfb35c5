//! UCB1 bandit over the fixed protocol arm set.
//!
//! All per-arm statistics and the shared pull total live behind one
//! mutex, so `select`, `update` and every read see either the state
//! before or after an update, never a mix.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use paumiot_common::{Arm, ArmStatistics, PaumiotError, Result, TransactionContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BanditSettings;

/// Internal mutable state of the learner.
struct ArmTable {
    arms: [ArmStatistics; Arm::COUNT],
    /// Times each arm was handed out by `select`, including selections
    /// whose outcome has not been reported yet
    selections: [u64; Arm::COUNT],
    total_pulls: u64,
}

/// Serializable copy of the learner state, used for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSnapshot {
    pub arms: [ArmStatistics; Arm::COUNT],
    pub total_pulls: u64,
}

impl BanditSnapshot {
    /// Arm with the highest mean reward among pulled arms.
    pub fn best_arm(&self) -> Option<Arm> {
        best_of(&self.arms)
    }

    pub fn statistics(&self, arm: Arm) -> &ArmStatistics {
        &self.arms[arm.index()]
    }
}

/// Upper-Confidence-Bound learner.
///
/// ```ignore
/// let bandit = UcbBandit::new(std::f64::consts::SQRT_2);
/// let arm = bandit.select(&ctx);
/// // ... send over `arm`, compute reward ...
/// bandit.update(arm, reward);
/// ```
pub struct UcbBandit {
    table: Mutex<ArmTable>,
    exploration: f64,
}

impl UcbBandit {
    /// Create a cold learner with exploration constant `c`.
    pub fn new(exploration: f64) -> Self {
        Self {
            table: Mutex::new(ArmTable {
                arms: [ArmStatistics::default(); Arm::COUNT],
                selections: [0; Arm::COUNT],
                total_pulls: 0,
            }),
            exploration: exploration.max(0.0),
        }
    }

    pub fn from_settings(settings: &BanditSettings) -> Self {
        Self::new(settings.exploration)
    }

    /// Choose an arm for a new transaction.
    ///
    /// Unpulled arms are returned first, in enumeration order. Selections
    /// still awaiting their `update` count too, so `Arm::COUNT`
    /// consecutive calls on a cold learner return every arm once.
    /// Afterwards the arm with the highest UCB score wins, ties going to
    /// the lowest enumeration index.
    pub fn select(&self, context: &TransactionContext) -> Arm {
        let mut table = self.table.lock();

        let arm = match forced_exploration(&table) {
            Some(arm) => arm,
            None => self.highest_score(&table),
        };
        table.selections[arm.index()] += 1;

        debug!(device_id = %context.device_id, %arm, total_pulls = table.total_pulls, "Bandit selected arm");
        arm
    }

    /// Fold a reward into the arm's statistics.
    pub fn update(&self, arm: Arm, reward: f64) {
        self.update_at(arm, reward, Utc::now());
    }

    /// Same as [`UcbBandit::update`] with an explicit timestamp.
    pub fn update_at(&self, arm: Arm, reward: f64, at: DateTime<Utc>) {
        let reward = if reward.is_finite() {
            reward
        } else {
            warn!(%arm, "Non-finite reward replaced with minimum reward");
            paumiot_common::MIN_REWARD
        };

        let mut table = self.table.lock();
        table.arms[arm.index()].observe(reward, at);
        table.total_pulls += 1;
        // Outcomes reported without a prior `select` (tree dispatch) still
        // count as handed out.
        let idx = arm.index();
        let pulled = table.arms[idx].pull_count;
        table.selections[idx] = table.selections[idx].max(pulled);
    }

    /// Arm with the highest mean reward among pulled arms, `None` when cold.
    pub fn best_arm(&self) -> Option<Arm> {
        best_of(&self.table.lock().arms)
    }

    pub fn statistics(&self, arm: Arm) -> ArmStatistics {
        self.table.lock().arms[arm.index()]
    }

    pub fn total_pulls(&self) -> u64 {
        self.table.lock().total_pulls
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    /// UCB score of every arm; `None` for unpulled arms.
    pub fn scores(&self) -> [Option<f64>; Arm::COUNT] {
        let table = self.table.lock();
        let mut scores = [None; Arm::COUNT];
        for arm in Arm::ALL {
            scores[arm.index()] = self.score(&table, arm);
        }
        scores
    }

    /// Consistent copy of all statistics.
    pub fn snapshot(&self) -> BanditSnapshot {
        let table = self.table.lock();
        BanditSnapshot {
            arms: table.arms,
            total_pulls: table.total_pulls,
        }
    }

    /// Replace the statistics with a checkpointed snapshot.
    ///
    /// Rejects snapshots whose per-arm pulls do not add up to the total.
    pub fn restore(&self, snapshot: &BanditSnapshot) -> Result<()> {
        let summed: u64 = snapshot.arms.iter().map(|s| s.pull_count).sum();
        if summed != snapshot.total_pulls {
            return Err(PaumiotError::Validation(format!(
                "bandit snapshot pulls {} do not match total {}",
                summed, snapshot.total_pulls
            )));
        }
        if snapshot
            .arms
            .iter()
            .any(|s| !s.mean_reward.is_finite() || !s.m2.is_finite())
        {
            return Err(PaumiotError::Validation(
                "bandit snapshot contains non-finite statistics".into(),
            ));
        }

        let mut table = self.table.lock();
        table.arms = snapshot.arms;
        table.total_pulls = snapshot.total_pulls;
        for arm in Arm::ALL {
            table.selections[arm.index()] = snapshot.arms[arm.index()].pull_count;
        }
        Ok(())
    }

    fn score(&self, table: &ArmTable, arm: Arm) -> Option<f64> {
        let stats = &table.arms[arm.index()];
        if !stats.is_pulled() {
            return None;
        }
        let total = table.total_pulls.max(1) as f64;
        let bonus = (total.ln() / stats.pull_count as f64).sqrt();
        Some(stats.mean_reward + self.exploration * bonus)
    }

    fn highest_score(&self, table: &ArmTable) -> Arm {
        let mut best = Arm::ALL[0];
        let mut best_score = f64::NEG_INFINITY;
        for arm in Arm::ALL {
            if let Some(score) = self.score(table, arm) {
                if score > best_score {
                    best = arm;
                    best_score = score;
                }
            }
        }
        best
    }
}

impl Default for UcbBandit {
    fn default() -> Self {
        Self::from_settings(&BanditSettings::default())
    }
}

/// Unpulled arm with the fewest outstanding selections, if any.
fn forced_exploration(table: &ArmTable) -> Option<Arm> {
    Arm::ALL
        .iter()
        .copied()
        .filter(|arm| !table.arms[arm.index()].is_pulled())
        .min_by_key(|arm| table.selections[arm.index()])
}

fn best_of(arms: &[ArmStatistics; Arm::COUNT]) -> Option<Arm> {
    let mut best: Option<(Arm, f64)> = None;
    for arm in Arm::ALL {
        let stats = &arms[arm.index()];
        if !stats.is_pulled() {
            continue;
        }
        match best {
            Some((_, mean)) if stats.mean_reward <= mean => {}
            _ => best = Some((arm, stats.mean_reward)),
        }
    }
    best.map(|(arm, _)| arm)
}
