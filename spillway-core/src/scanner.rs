//! Polling scanner: walks the watch root, tracks quiescence and queues
//! eligible files for upload.

use crate::config::PipelineConfig;
use crate::operations::{UploadTask, object_key_for};
use crate::tracking::{FileSnapshot, InFlightRegistry, StabilityTracker};
use crate::{Result, SpillError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

/// Suffixes decoders use for files that are still being written
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".tmp"];

/// Case-insensitive extension allow-list plus the hidden/partial-file rules.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
    include_hidden: bool,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I, include_hidden: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            extensions,
            include_hidden,
        }
    }

    pub fn allows(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };

        if !self.include_hidden && name.starts_with('.') {
            return false;
        }

        let lowered = name.to_ascii_lowercase();
        if PARTIAL_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix)) {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files_seen: usize,
    pub eligible: usize,
    pub submitted: usize,
    pub skipped_in_flight: usize,
    pub purged: usize,
    pub errors: usize,
}

#[derive(Debug)]
struct Observation {
    path: PathBuf,
    snapshot: FileSnapshot,
}

/// Sole producer of upload tasks. Owns the stability tracker; ticks run
/// sequentially through `&mut self`.
pub struct Scanner {
    root: PathBuf,
    prefix: String,
    filter: ExtensionFilter,
    tracker: StabilityTracker,
    in_flight: InFlightRegistry,
    queue: async_channel::Sender<UploadTask>,
}

impl Scanner {
    pub fn new(
        config: &PipelineConfig,
        in_flight: InFlightRegistry,
        queue: async_channel::Sender<UploadTask>,
    ) -> Self {
        Self {
            root: config.watch_root.clone(),
            prefix: config.normalized_prefix().to_string(),
            filter: ExtensionFilter::new(&config.extensions, config.include_hidden),
            tracker: StabilityTracker::new(config.quiet_period),
            in_flight,
            queue,
        }
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    /// One full pass over the watch root.
    pub async fn tick(&mut self) -> Result<ScanReport> {
        if !tokio::fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(SpillError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("watch root {} is not a directory", self.root.display()),
            )));
        }

        let root = self.root.clone();
        let filter = self.filter.clone();
        let (observations, walk_errors) =
            tokio::task::spawn_blocking(move || walk_candidates(&root, &filter))
                .await
                .map_err(|error| SpillError::Internal(format!("scan walk panicked: {}", error)))?;

        let now = Instant::now();
        let mut report = ScanReport {
            files_seen: observations.len(),
            errors: walk_errors,
            ..ScanReport::default()
        };

        let present: HashSet<PathBuf> = observations
            .iter()
            .map(|observation| observation.path.clone())
            .collect();
        report.purged = self.tracker.retain_present(&present);

        for Observation { path, snapshot } in observations {
            if self.in_flight.contains(&path) {
                report.skipped_in_flight += 1;
                continue;
            }

            if !self.tracker.observe(&path, snapshot, now) {
                continue;
            }
            report.eligible += 1;

            let key = match object_key_for(&self.root, &path, &self.prefix) {
                Ok(key) => key,
                Err(error) => {
                    tracing::warn!("Skipping {}: {}", path.display(), error);
                    report.errors += 1;
                    continue;
                }
            };

            let Some(guard) = self.in_flight.acquire(&path) else {
                report.skipped_in_flight += 1;
                continue;
            };
            self.tracker.forget(&path);

            tracing::debug!("Queued path={} key={}", path.display(), key);
            // Unbounded queue: sending only fails once the pool has shut down,
            // and the rejected task drops its guard on the way out.
            self.queue
                .try_send(UploadTask::new(key, snapshot, guard))
                .map_err(|_| SpillError::Internal("upload queue is closed".to_string()))?;
            report.submitted += 1;
        }

        tracing::debug!(
            "Scan tick root={} seen={} eligible={} submitted={} in_flight={} purged={} errors={}",
            self.root.display(),
            report.files_seen,
            report.eligible,
            report.submitted,
            report.skipped_in_flight,
            report.purged,
            report.errors
        );

        Ok(report)
    }
}

/// Blocking walk. Hidden and partial rules apply to file names only, so
/// hidden directories are still descended into.
fn walk_candidates(root: &Path, filter: &ExtensionFilter) -> (Vec<Observation>, usize) {
    collect_observations(root, WalkDir::new(root).follow_links(false), filter)
}

/// Per-entry failures are logged and counted, never fatal.
fn collect_observations<I>(
    root: &Path,
    entries: I,
    filter: &ExtensionFilter,
) -> (Vec<Observation>, usize)
where
    I: IntoIterator<Item = walkdir::Result<DirEntry>>,
{
    let mut observations = Vec::new();
    let mut errors = 0usize;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!("Scan skipped entry under {}: {}", root.display(), error);
                errors += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() || !filter.allows(entry.path()) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) => observations.push(Observation {
                path: entry.into_path(),
                snapshot: FileSnapshot::from_metadata(&meta),
            }),
            Err(error) => {
                tracing::warn!("Scan could not stat {}: {}", entry.path().display(), error);
                errors += 1;
            }
        }
    }

    (observations, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scanner_for(root: &Path, quiet: Duration) -> (Scanner, async_channel::Receiver<UploadTask>) {
        let config = PipelineConfig {
            watch_root: root.to_path_buf(),
            quiet_period: quiet,
            key_prefix: "goes".to_string(),
            ..PipelineConfig::default()
        };
        let (sender, receiver) = async_channel::unbounded();
        (Scanner::new(&config, InFlightRegistry::new(), sender), receiver)
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::new(["jpg", " .TIF ", ""], false);
        assert!(filter.allows(Path::new("/data/a.jpg")));
        assert!(filter.allows(Path::new("/data/A.JPG")));
        assert!(filter.allows(Path::new("/data/b.tif")));
        assert!(!filter.allows(Path::new("/data/notes.txt")));
        assert!(!filter.allows(Path::new("/data/.hidden.jpg")));
        assert!(!filter.allows(Path::new("/data/frame.jpg.part")));
        assert!(!filter.allows(Path::new("/data/frame.tmp")));
        assert!(!filter.allows(Path::new("/data/noext")));

        let with_hidden = ExtensionFilter::new(["jpg"], true);
        assert!(with_hidden.allows(Path::new("/data/.hidden.jpg")));
    }

    #[tokio::test]
    async fn test_eligible_files_are_queued_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("2024/07")).unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), vec![1u8; 1000]).unwrap();
        std::fs::write(temp_dir.path().join("2024/07/b.TIF"), b"tif").unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), b"skip").unwrap();

        let (mut scanner, receiver) = scanner_for(temp_dir.path(), Duration::ZERO);

        let first = scanner.tick().await.unwrap();
        assert_eq!(first.files_seen, 2);
        assert_eq!(first.submitted, 0);

        let second = scanner.tick().await.unwrap();
        assert_eq!(second.eligible, 2);
        assert_eq!(second.submitted, 2);
        assert!(scanner.tracker().is_empty());

        let mut keys: Vec<String> = Vec::new();
        let mut held = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            keys.push(task.key.clone());
            held.push(task);
        }
        keys.sort();
        assert_eq!(keys, vec!["goes/2024/07/b.TIF", "goes/a.jpg"]);

        // held tasks keep their paths in flight
        let third = scanner.tick().await.unwrap();
        assert_eq!(third.submitted, 0);
        assert_eq!(third.skipped_in_flight, 2);
        assert!(receiver.is_empty());

        // released paths start a fresh stabilization episode
        drop(held);
        let fourth = scanner.tick().await.unwrap();
        assert_eq!(fourth.submitted, 0);
        let fifth = scanner.tick().await.unwrap();
        assert_eq!(fifth.submitted, 2);
    }

    #[tokio::test]
    async fn test_modification_restarts_countdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("c.png");
        std::fs::write(&path, b"first").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();

        let (mut scanner, receiver) = scanner_for(temp_dir.path(), Duration::ZERO);
        scanner.tick().await.unwrap();

        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(2_000, 0)).unwrap();
        let changed = scanner.tick().await.unwrap();
        assert_eq!(changed.eligible, 0);
        assert!(receiver.is_empty());

        let settled = scanner.tick().await.unwrap();
        assert_eq!(settled.submitted, 1);
    }

    #[tokio::test]
    async fn test_quiet_period_holds_back_fresh_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"jpg").unwrap();

        let (mut scanner, receiver) = scanner_for(temp_dir.path(), Duration::from_secs(3600));
        scanner.tick().await.unwrap();
        let report = scanner.tick().await.unwrap();
        assert_eq!(report.eligible, 0);
        assert!(receiver.is_empty());
        assert_eq!(scanner.tracker().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_files_are_purged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.jpg");
        std::fs::write(&path, b"jpg").unwrap();

        let (mut scanner, _receiver) = scanner_for(temp_dir.path(), Duration::from_secs(3600));
        scanner.tick().await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let report = scanner.tick().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(scanner.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_hidden_directories_are_descended() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".cache")).unwrap();
        std::fs::write(temp_dir.path().join(".cache/a.jpg"), b"jpg").unwrap();
        std::fs::write(temp_dir.path().join(".cache/.b.jpg"), b"jpg").unwrap();

        let (mut scanner, receiver) = scanner_for(temp_dir.path(), Duration::ZERO);
        scanner.tick().await.unwrap();
        let report = scanner.tick().await.unwrap();
        assert_eq!(report.files_seen, 1);
        assert_eq!(report.submitted, 1);
        assert_eq!(receiver.try_recv().unwrap().key, "goes/.cache/a.jpg");
    }

    #[test]
    fn test_stat_failure_skips_only_that_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"jpg").unwrap();
        std::fs::write(temp_dir.path().join("b.jpg"), b"jpg").unwrap();

        let entries: Vec<_> = WalkDir::new(temp_dir.path()).into_iter().collect();
        std::fs::remove_file(temp_dir.path().join("a.jpg")).unwrap();

        let filter = ExtensionFilter::new(["jpg"], false);
        let (observations, errors) = collect_observations(temp_dir.path(), entries, &filter);
        assert_eq!(errors, 1);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].path, temp_dir.path().join("b.jpg"));
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (mut scanner, _receiver) =
            scanner_for(&temp_dir.path().join("missing"), Duration::ZERO);
        assert!(scanner.tick().await.unwrap_err().is_not_found_io());
    }
}
