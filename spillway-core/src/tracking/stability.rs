use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Size and modification time as seen by one stat call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileSnapshot {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedPath {
    snapshot: FileSnapshot,
    last_changed: Instant,
}

/// Quiet-period detector. A path becomes eligible once its snapshot has been
/// observed unchanged on a later scan at least `quiet_period` after it last
/// changed. Owned by the scanner; never shared across tasks.
#[derive(Debug)]
pub struct StabilityTracker {
    quiet_period: Duration,
    entries: HashMap<PathBuf, TrackedPath>,
}

impl StabilityTracker {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            entries: HashMap::new(),
        }
    }

    /// Record an observation and report whether the path is upload-eligible.
    pub fn observe(&mut self, path: &Path, snapshot: FileSnapshot, now: Instant) -> bool {
        match self.entries.get_mut(path) {
            Some(tracked) if tracked.snapshot == snapshot => {
                now.saturating_duration_since(tracked.last_changed) >= self.quiet_period
            }
            Some(tracked) => {
                tracked.snapshot = snapshot;
                tracked.last_changed = now;
                false
            }
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    TrackedPath {
                        snapshot,
                        last_changed: now,
                    },
                );
                false
            }
        }
    }

    /// Drop a path once ownership moves to a worker.
    pub fn forget(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Purge entries whose files were not seen on the latest walk.
    /// Returns the number of entries removed.
    pub fn retain_present(&mut self, present: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| present.contains(path));
        before - self.entries.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
