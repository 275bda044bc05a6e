//! Advisory lock guarding a target's checkpoint for the length of a run

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive, process-wide claim on one target's checkpoint.
///
/// The lock is released when this value is dropped (the file descriptor is
/// closed).
pub struct CheckpointLock {
    _file: RwLock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for CheckpointLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointLock")
            .field("path", &self.path)
            .finish()
    }
}

impl CheckpointLock {
    /// Take the lock at `path` without blocking.
    ///
    /// Fails with [`ResumeError::Locked`] when another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ResumeError::LockError(format!("failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            Ok(mut guard) => {
                // Owner pid is informational only.
                let _ = guard.set_len(0);
                let _ = write!(*guard, "{}", std::process::id());
                // Keep the OS lock for as long as the descriptor stays open.
                std::mem::forget(guard);
            }
            Err(_) => {
                let holder = std::fs::read_to_string(path)
                    .ok()
                    .and_then(|pid| pid.trim().parse().ok());
                return Err(ResumeError::Locked {
                    path: path.to_path_buf(),
                    holder,
                });
            }
        }

        debug!(path = %path.display(), "Acquired checkpoint lock");
        Ok(Self {
            _file: lock,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Released checkpoint lock");
    }
}
