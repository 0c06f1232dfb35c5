//! Durable learner state
//!
//! A checkpoint holds the bandit statistics and the active tree. The
//! bincode body is wrapped in an envelope carrying its blake3 hash and
//! written through a temp file plus rename, so a crash mid-write leaves
//! the previous checkpoint in place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use paumiot_common::CheckpointError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::bandit::BanditSnapshot;
use crate::distiller::DecisionTree;

/// Current on-disk layout
pub const CHECKPOINT_FORMAT: u32 = 1;

/// Learner state persisted across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format: u32,
    pub saved_at: DateTime<Utc>,
    pub bandit: BanditSnapshot,
    pub tree: Option<DecisionTree>,
}

impl Checkpoint {
    pub fn new(bandit: BanditSnapshot, tree: Option<DecisionTree>) -> Self {
        Self {
            format: CHECKPOINT_FORMAT,
            saved_at: Utc::now(),
            bandit,
            tree,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u32,
    checksum: [u8; 32],
    body: Vec<u8>,
}

/// File-backed checkpoint location
///
/// Clones share one writer lock; saves through any of them never
/// interleave on the temp file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Atomically replace the checkpoint file
    #[instrument(skip(self, checkpoint), fields(path = %self.path.display()))]
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let body = bincode::serialize(checkpoint).map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
        let envelope = Envelope {
            format: CHECKPOINT_FORMAT,
            checksum: *blake3::hash(&body).as_bytes(),
            body,
        };
        let bytes = bincode::serialize(&envelope).map_err(|e| CheckpointError::Corrupted(e.to_string()))?;

        let _writer = self.writer.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        info!(
            bytes = bytes.len(),
            total_pulls = checkpoint.bandit.total_pulls,
            tree_version = checkpoint.tree.as_ref().map_or(0, |t| t.version()),
            "Checkpoint written"
        );
        Ok(())
    }

    /// Read the checkpoint; `Ok(None)` when none has been written yet
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope =
            bincode::deserialize(&bytes).map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
        if envelope.format != CHECKPOINT_FORMAT {
            return Err(CheckpointError::UnsupportedFormat {
                found: envelope.format,
                expected: CHECKPOINT_FORMAT,
            });
        }

        let actual = blake3::hash(&envelope.body);
        if actual.as_bytes() != &envelope.checksum {
            return Err(CheckpointError::ChecksumMismatch {
                expected: blake3::Hash::from(envelope.checksum).to_hex().to_string(),
                actual: actual.to_hex().to_string(),
            });
        }

        let checkpoint: Checkpoint =
            bincode::deserialize(&envelope.body).map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
        Ok(Some(checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::UcbBandit;
    use crate::distiller::{DecisionTreeNode, Feature};
    use paumiot_common::Arm;

    fn sample_checkpoint() -> Checkpoint {
        let bandit = UcbBandit::default();
        bandit.update(Arm::Coap, 0.8);
        bandit.update(Arm::Mqtt, 0.4);
        let tree = DecisionTree::new(
            DecisionTreeNode::Split {
                feature: Feature::PayloadSize,
                threshold: 512.0,
                left: Box::new(DecisionTreeNode::leaf(Arm::Coap, 0.9, 40)),
                right: Box::new(DecisionTreeNode::leaf(Arm::PriotpReliable, 0.7, 10)),
            },
            3,
            0.92,
            50,
        );
        Checkpoint::new(bandit.snapshot(), Some(tree))
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state/paumiot.ckpt"));
        let checkpoint = sample_checkpoint();

        store.save(&checkpoint).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_overlapping_saves_leave_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("paumiot.ckpt"));
        let checkpoint = sample_checkpoint();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = store.clone();
                let checkpoint = &checkpoint;
                scope.spawn(move || {
                    for _ in 0..10 {
                        store.save(checkpoint).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.load().unwrap().unwrap(), checkpoint);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.ckpt"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paumiot.ckpt");
        let store = CheckpointStore::new(&path);
        store.save(&sample_checkpoint()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.load(),
            Err(CheckpointError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paumiot.ckpt");
        let store = CheckpointStore::new(&path);
        store.save(&sample_checkpoint()).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(store.load(), Err(CheckpointError::Corrupted(_))));
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("paumiot.ckpt"));
        store.save(&sample_checkpoint()).unwrap();

        let empty = Checkpoint::new(UcbBandit::default().snapshot(), None);
        store.save(&empty).unwrap();
        assert_eq!(store.load().unwrap().unwrap().tree, None);
    }
}
