//! Checkpoint persistence
//!
//! Each target owns three files in the state directory:
//! `<target>.state.json` (the [`CollectionState`]), `<target>.state.lock`
//! (advisory lock held for a whole run) and `<target>.stats.json` (summary of
//! the last run).

pub mod cursor;
pub mod lock;
pub mod state;

pub use cursor::Cursor;
pub use lock::CheckpointLock;
pub use state::{read_json, write_json_atomic, CollectionState, ResumeError, MAX_STATE_FILE_SIZE};

use crate::registry::TargetConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File-backed checkpoint store for one target
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    target: String,
    state_path: PathBuf,
    lock_path: PathBuf,
    stats_path: PathBuf,
}

impl CheckpointStore {
    /// Store for `target` under `state_dir`
    pub fn new(state_dir: impl AsRef<Path>, target: impl Into<String>) -> Self {
        let target = target.into();
        let dir = state_dir.as_ref();
        Self {
            state_path: dir.join(format!("{target}.state.json")),
            lock_path: dir.join(format!("{target}.state.lock")),
            stats_path: dir.join(format!("{target}.stats.json")),
            target,
        }
    }

    /// Target id
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Checkpoint path
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Lock file path
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run summary path
    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    /// Whether a checkpoint exists
    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }

    /// Take the exclusive run lock
    pub fn lock(&self) -> Result<CheckpointLock, ResumeError> {
        CheckpointLock::try_acquire(&self.lock_path)
    }

    /// Load the checkpoint, if any.
    ///
    /// Rejects files written by another schema version or for another target.
    pub fn load(&self) -> Result<Option<CollectionState>, ResumeError> {
        let Some(state) = read_json::<CollectionState>(&self.state_path)? else {
            debug!(path = %self.state_path.display(), "No checkpoint found");
            return Ok(None);
        };
        state.validate_schema_version()?;
        if state.target() != self.target {
            return Err(ResumeError::TargetMismatch(format!(
                "{} holds state for '{}', expected '{}'",
                self.state_path.display(),
                state.target(),
                self.target
            )));
        }
        info!(
            path = %self.state_path.display(),
            collected = state.collected_count(),
            cursor = %state.cursor(),
            "Checkpoint loaded"
        );
        Ok(Some(state))
    }

    /// Load and check the checkpoint against a target's strategy
    pub fn load_for(&self, target: &TargetConfig) -> Result<Option<CollectionState>, ResumeError> {
        let state = self.load()?;
        if let Some(state) = &state {
            if !state.cursor().matches(&target.strategy) {
                return Err(ResumeError::TargetMismatch(format!(
                    "checkpoint cursor ({}) does not fit the configured strategy",
                    state.cursor()
                )));
            }
        }
        Ok(state)
    }

    /// Atomically write the checkpoint
    pub fn save(&self, state: &CollectionState) -> Result<(), ResumeError> {
        write_json_atomic(&self.state_path, state)?;
        debug!(
            path = %self.state_path.display(),
            collected = state.collected_count(),
            cursor = %state.cursor(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Atomically write a run summary
    pub fn save_stats<T: Serialize>(&self, stats: &T) -> Result<(), ResumeError> {
        write_json_atomic(&self.stats_path, stats)
    }

    /// Read the last run summary
    pub fn load_stats<T: DeserializeOwned>(&self) -> Result<Option<T>, ResumeError> {
        read_json(&self.stats_path)
    }

    /// Delete checkpoint and stats. Returns whether a checkpoint existed.
    pub fn remove(&self) -> Result<bool, ResumeError> {
        let existed = remove_if_exists(&self.state_path)?;
        remove_if_exists(&self.stats_path)?;
        if existed {
            warn!(path = %self.state_path.display(), "Checkpoint deleted");
        }
        Ok(existed)
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, ResumeError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ResumeError::IoError(format!(
            "failed to remove {}: {e}",
            path.display()
        ))),
    }
}
