use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Paths currently queued or uploading. Membership is the only thing that
/// keeps two workers off the same file, so every insert goes through
/// `try_acquire` under one lock.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert if absent. Returns false when the path is already owned.
    pub fn try_acquire(&self, path: &Path) -> bool {
        let mut paths = self.lock();
        if paths.contains(path) {
            return false;
        }
        paths.insert(path.to_path_buf())
    }

    /// Acquire and hand back a guard that releases the path on drop.
    pub fn acquire(&self, path: &Path) -> Option<InFlightGuard> {
        if self.try_acquire(path) {
            Some(InFlightGuard {
                registry: self.clone(),
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }

    /// Idempotent removal.
    pub fn release(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Ownership token for one in-flight path.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    path: PathBuf,
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}
