//! CR-006: Execution root handling and the scoped working-directory guard.

use super::error::EngineError;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// The working directory is process-wide; guards from independent engines
// must not interleave.
pub(super) static CWD_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Create the execution root if absent. An existing directory is fine.
pub fn ensure_dir(root: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(root).map_err(|source| EngineError::Io {
        path: root.to_path_buf(),
        source,
    })
}

/// Changes the working directory for its lifetime and restores the previous
/// one on drop. Holds the process-wide directory lock while alive, so a
/// task action must not start a nested run on the same thread.
pub struct WorkdirGuard {
    previous: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkdirGuard {
    pub fn enter(root: &Path) -> Result<Self, EngineError> {
        let lock = CWD_LOCK.lock();
        let previous = std::env::current_dir().map_err(|source| EngineError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        std::env::set_current_dir(root).map_err(|source| EngineError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        debug!("entered {} (from {})", root.display(), previous.display());
        Ok(Self {
            previous,
            _lock: lock,
        })
    }

    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            warn!(
                "cannot restore working directory {}: {}",
                self.previous.display(),
                e
            );
        }
    }
}
