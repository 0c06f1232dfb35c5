//! Bounded experience ring buffer
//!
//! Append and eviction happen under one write lock, so a snapshot never
//! sees the buffer above capacity or with a gap.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use paumiot_common::{Arm, ArmStatistics, Experience};
use tracing::trace;

use crate::config::StoreSettings;

struct Entry {
    experience: Arc<Experience>,
    /// Reward deviated from the arm's running mean when recorded
    significant: bool,
}

struct Ring {
    entries: VecDeque<Entry>,
    /// Running reward mean per arm, for significance marking only
    running: [ArmStatistics; Arm::COUNT],
    significant: usize,
    recorded_total: u64,
    evicted_total: u64,
}

/// Append-only rolling buffer of completed transactions
pub struct ExperienceStore {
    ring: RwLock<Ring>,
    capacity: usize,
    significance_threshold: f64,
}

/// Point-in-time counters for the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub size: usize,
    pub capacity: usize,
    pub significant: usize,
    pub recorded_total: u64,
    pub evicted_total: u64,
}

impl ExperienceStore {
    /// Create a store; a zero capacity is raised to one
    pub fn new(capacity: usize, significance_threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: RwLock::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(crate::DEFAULT_STORE_CAPACITY)),
                running: [ArmStatistics::default(); Arm::COUNT],
                significant: 0,
                recorded_total: 0,
                evicted_total: 0,
            }),
            capacity,
            significance_threshold: significance_threshold.max(0.0),
        }
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self::new(settings.capacity, settings.significance_threshold)
    }

    /// Append an experience, evicting the oldest one when full
    pub fn record(&self, experience: Experience) {
        let mut ring = self.ring.write();

        let stats = &mut ring.running[experience.arm.index()];
        let significant = stats.is_pulled()
            && (experience.reward - stats.mean_reward).abs() > self.significance_threshold;
        stats.observe(experience.reward, experience.timestamp);

        if ring.entries.len() == self.capacity {
            if let Some(evicted) = ring.entries.pop_front() {
                if evicted.significant {
                    ring.significant -= 1;
                }
                ring.evicted_total += 1;
            }
        }
        if significant {
            ring.significant += 1;
        }
        ring.recorded_total += 1;
        trace!(arm = %experience.arm, reward = experience.reward, significant, "Recorded experience");
        ring.entries.push_back(Entry {
            experience: Arc::new(experience),
            significant,
        });
    }

    /// Copy of the buffer, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Experience>> {
        self.ring
            .read()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.experience))
            .collect()
    }

    /// Copy of the `limit` most recent experiences, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<Experience>> {
        let ring = self.ring.read();
        let skip = ring.entries.len().saturating_sub(limit);
        ring.entries
            .iter()
            .skip(skip)
            .map(|e| Arc::clone(&e.experience))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.ring.read().entries.len()
    }

    /// Experiences in the buffer whose reward was informative when recorded
    pub fn significant_count(&self) -> usize {
        self.ring.read().significant
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let ring = self.ring.read();
        StoreStats {
            size: ring.entries.len(),
            capacity: self.capacity,
            significant: ring.significant,
            recorded_total: ring.recorded_total,
            evicted_total: ring.evicted_total,
        }
    }
}

impl Default for ExperienceStore {
    fn default() -> Self {
        Self::from_settings(&StoreSettings::default())
    }
}
