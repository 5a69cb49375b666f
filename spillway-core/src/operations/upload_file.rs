use crate::config::RetryPolicy;
use crate::storage::{DynStorageGateway, compute_file_digest};
use crate::tracking::{FileSnapshot, InFlightGuard};
use crate::{Result, SpillError};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Metadata key carrying the hex MD5 of the uploaded bytes
pub const MD5_METADATA_KEY: &str = "md5";

/// One eligible file handed from the scanner to a worker. Holds the in-flight
/// guard, so the path is released whenever the task is dropped.
#[derive(Debug)]
pub struct UploadTask {
    pub path: PathBuf,
    pub key: String,
    /// Size and mtime when the scanner found the file quiet
    pub snapshot: FileSnapshot,
    _guard: InFlightGuard,
}

impl UploadTask {
    pub fn new(key: String, snapshot: FileSnapshot, guard: InFlightGuard) -> Self {
        Self {
            path: guard.path().to_path_buf(),
            key,
            snapshot,
            _guard: guard,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub delete_after_upload: bool,
    pub extra_metadata: HashMap<String, String>,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            delete_after_upload: true,
            extra_metadata: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainReason {
    DeletionDisabled,
    DeleteFailed(String),
}

#[derive(Debug)]
pub enum UploadOutcome {
    DeliveredAndDeleted {
        key: String,
        size: u64,
    },
    DeliveredButRetained {
        key: String,
        size: u64,
        reason: RetainReason,
    },
    /// `remote_size` is `None` when the file changed after it was queued and
    /// nothing was uploaded.
    VerificationMismatch {
        key: String,
        local_size: u64,
        remote_size: Option<u64>,
    },
    TransportError {
        key: String,
        error: SpillError,
        attempts: u32,
    },
    SourceVanished {
        key: String,
    },
}

impl UploadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::DeliveredAndDeleted { .. } => "delivered-and-deleted",
            UploadOutcome::DeliveredButRetained { .. } => "delivered-but-retained",
            UploadOutcome::VerificationMismatch { .. } => "verification-mismatch",
            UploadOutcome::TransportError { .. } => "transport-error",
            UploadOutcome::SourceVanished { .. } => "source-vanished",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            UploadOutcome::DeliveredAndDeleted { .. } | UploadOutcome::DeliveredButRetained { .. }
        )
    }
}

/// Upload, verify by HEAD, then delete. Errors never escape `run`; every
/// failure becomes an outcome and the local file is kept.
pub struct UploadFileOperation {
    gateway: DynStorageGateway,
    bucket_ready: OnceCell<()>,
    options: UploadOptions,
}

impl UploadFileOperation {
    pub fn new(gateway: DynStorageGateway, options: UploadOptions) -> Self {
        Self {
            gateway,
            bucket_ready: OnceCell::new(),
            options,
        }
    }

    pub async fn run(&self, task: UploadTask) -> UploadOutcome {
        let outcome = self.run_with_retry(&task).await;
        log_outcome(&task.path, self.gateway.bucket(), &outcome);
        // releasing the in-flight entry is the last step
        drop(task);
        outcome
    }

    async fn run_with_retry(&self, task: &UploadTask) -> UploadOutcome {
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(task).await {
                Ok(outcome) => return outcome,
                Err(error) if error.is_not_found_io() => {
                    return UploadOutcome::SourceVanished {
                        key: task.key.clone(),
                    };
                }
                Err(error) if error.is_storage() && attempt < max_attempts => {
                    let delay = self.options.retry.backoff_for(attempt);
                    tracing::warn!(
                        "Upload failed path={} attempt={} retry_in={:?}: {}",
                        task.path.display(),
                        attempt,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return UploadOutcome::TransportError {
                        key: task.key.clone(),
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    async fn attempt(&self, task: &UploadTask) -> Result<UploadOutcome> {
        let before = FileSnapshot::from_metadata(&tokio::fs::metadata(&task.path).await?);
        if before != task.snapshot {
            return Ok(UploadOutcome::VerificationMismatch {
                key: task.key.clone(),
                local_size: before.size,
                remote_size: None,
            });
        }

        let digest = compute_file_digest(&task.path).await?;
        let local_before = before.size;
        if local_before != digest.bytes_read {
            return Ok(UploadOutcome::VerificationMismatch {
                key: task.key.clone(),
                local_size: digest.bytes_read,
                remote_size: None,
            });
        }

        self.ensure_bucket().await?;

        let mut metadata = self.options.extra_metadata.clone();
        metadata.insert(MD5_METADATA_KEY.to_string(), digest.md5_hex.clone());

        tracing::info!(
            "Uploading {} -> s3://{}/{} ({} bytes)",
            task.path.display(),
            self.gateway.bucket(),
            task.key,
            local_before
        );
        self.gateway
            .put_object(&task.key, &task.path, &metadata)
            .await?;

        let head = self.gateway.head_object(&task.key).await?;

        let local_now = match tokio::fs::metadata(&task.path).await {
            Ok(meta) => meta.len(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(UploadOutcome::SourceVanished {
                    key: task.key.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        if head.size != local_before || head.size != local_now {
            return Ok(UploadOutcome::VerificationMismatch {
                key: task.key.clone(),
                local_size: local_now,
                remote_size: Some(head.size),
            });
        }

        tracing::debug!("Verified upload size for {} ({} bytes)", task.key, head.size);

        Ok(settle_source(
            &task.path,
            &task.key,
            head.size,
            self.options.delete_after_upload,
        )
        .await)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        self.bucket_ready
            .get_or_try_init(|| async { self.gateway.ensure_bucket().await })
            .await?;
        Ok(())
    }
}

/// Final step for a verified upload: delete the local copy or say why it stays.
async fn settle_source(path: &Path, key: &str, size: u64, delete: bool) -> UploadOutcome {
    if !delete {
        return UploadOutcome::DeliveredButRetained {
            key: key.to_string(),
            size,
            reason: RetainReason::DeletionDisabled,
        };
    }

    match tokio::fs::remove_file(path).await {
        Ok(()) => UploadOutcome::DeliveredAndDeleted {
            key: key.to_string(),
            size,
        },
        Err(error) => UploadOutcome::DeliveredButRetained {
            key: key.to_string(),
            size,
            reason: RetainReason::DeleteFailed(error.to_string()),
        },
    }
}

fn log_outcome(path: &Path, bucket: &str, outcome: &UploadOutcome) {
    let label = outcome.label();
    match outcome {
        UploadOutcome::DeliveredAndDeleted { key, size } => {
            tracing::info!(
                "upload {} path={} object=s3://{}/{} size={}",
                label,
                path.display(),
                bucket,
                key,
                size
            );
        }
        UploadOutcome::DeliveredButRetained {
            key,
            size,
            reason: RetainReason::DeletionDisabled,
        } => {
            tracing::info!(
                "upload {} path={} object=s3://{}/{} size={} reason=deletion disabled",
                label,
                path.display(),
                bucket,
                key,
                size
            );
        }
        UploadOutcome::DeliveredButRetained {
            key,
            size,
            reason: RetainReason::DeleteFailed(error),
        } => {
            tracing::warn!(
                "upload {} path={} object=s3://{}/{} size={} reason=delete failed: {}",
                label,
                path.display(),
                bucket,
                key,
                size,
                error
            );
        }
        UploadOutcome::VerificationMismatch {
            key,
            local_size,
            remote_size: Some(remote_size),
        } => {
            tracing::error!(
                "upload {} path={} key={} remote={} local={} reason=size differs, file retained",
                label,
                path.display(),
                key,
                remote_size,
                local_size
            );
        }
        UploadOutcome::VerificationMismatch {
            key,
            local_size,
            remote_size: None,
        } => {
            tracing::error!(
                "upload {} path={} key={} local={} reason=file changed after it was queued, file retained",
                label,
                path.display(),
                key,
                local_size
            );
        }
        UploadOutcome::TransportError {
            key,
            error,
            attempts,
        } => {
            tracing::error!(
                "upload {} path={} key={} attempts={} reason={}",
                label,
                path.display(),
                key,
                attempts,
                error
            );
        }
        UploadOutcome::SourceVanished { key } => {
            tracing::warn!(
                "upload {} path={} key={} reason=file no longer exists",
                label,
                path.display(),
                key
            );
        }
    }
}

/// `{prefix}/{path relative to root}` with forward slashes; the prefix is
/// omitted when empty.
pub fn object_key_for(root: &Path, path: &Path, prefix: &str) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        SpillError::InvalidPath(format!(
            "{} is not under watch root {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut components = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    SpillError::InvalidPath(format!("non utf-8 path: {}", path.display()))
                })?;
                components.push(part);
            }
            _ => {
                return Err(SpillError::InvalidPath(format!(
                    "invalid path component in {}",
                    path.display()
                )));
            }
        }
    }

    if components.is_empty() {
        return Err(SpillError::InvalidPath(format!(
            "{} has no path below the watch root",
            path.display()
        )));
    }

    let relative_key = components.join("/");
    let prefix = crate::config::normalize_prefix(prefix);
    if prefix.is_empty() {
        Ok(relative_key)
    } else {
        Ok(format!("{}/{}", prefix, relative_key))
    }
}

/// Shared handle used by the worker pool.
pub type SharedUploadOperation = Arc<UploadFileOperation>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ObjectStoreGateway, StorageGateway, compute_hash};
    use crate::tracking::InFlightRegistry;
    use std::time::Duration;

    fn task_for(registry: &InFlightRegistry, root: &Path, path: &Path) -> UploadTask {
        let guard = registry.acquire(path).unwrap();
        let key = object_key_for(root, path, "raw").unwrap();
        let snapshot = std::fs::metadata(path)
            .map(|meta| FileSnapshot::from_metadata(&meta))
            .unwrap_or(FileSnapshot {
                size: 0,
                modified: None,
            });
        UploadTask::new(key, snapshot, guard)
    }

    #[test]
    fn test_object_key_for() {
        let root = Path::new("/data");
        assert_eq!(
            object_key_for(root, Path::new("/data/2024/01/a.jpg"), "/goes/").unwrap(),
            "goes/2024/01/a.jpg"
        );
        assert_eq!(
            object_key_for(root, Path::new("/data/a.jpg"), "").unwrap(),
            "a.jpg"
        );
        assert!(object_key_for(root, Path::new("/other/a.jpg"), "").is_err());
        assert!(object_key_for(root, Path::new("/data"), "").is_err());
    }

    #[tokio::test]
    async fn test_delivered_and_deleted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.jpg");
        let data = vec![42u8; 1000];
        std::fs::write(&path, &data).unwrap();

        let gateway = Arc::new(ObjectStoreGateway::in_memory("artifacts"));
        let mut extra = HashMap::new();
        extra.insert("site".to_string(), "east".to_string());
        let operation = UploadFileOperation::new(
            gateway.clone(),
            UploadOptions {
                extra_metadata: extra,
                ..UploadOptions::default()
            },
        );

        let registry = InFlightRegistry::new();
        let outcome = operation
            .run(task_for(&registry, temp_dir.path(), &path))
            .await;

        assert!(matches!(
            outcome,
            UploadOutcome::DeliveredAndDeleted { ref key, size: 1000 } if key == "raw/a.jpg"
        ));
        assert!(!path.exists());
        assert!(registry.is_empty());

        let head = gateway.head_object("raw/a.jpg").await.unwrap();
        assert_eq!(head.size, 1000);
        assert_eq!(head.metadata.get("md5"), Some(&compute_hash(&data)));
        assert_eq!(head.metadata.get("site").map(String::as_str), Some("east"));
    }

    #[tokio::test]
    async fn test_deletion_disabled_retains_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("keep.png");
        std::fs::write(&path, b"png").unwrap();

        let operation = UploadFileOperation::new(
            Arc::new(ObjectStoreGateway::in_memory("artifacts")),
            UploadOptions {
                delete_after_upload: false,
                ..UploadOptions::default()
            },
        );
        let registry = InFlightRegistry::new();
        let outcome = operation
            .run(task_for(&registry, temp_dir.path(), &path))
            .await;

        assert!(matches!(
            outcome,
            UploadOutcome::DeliveredButRetained {
                reason: RetainReason::DeletionDisabled,
                size: 3,
                ..
            }
        ));
        assert!(path.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("gone.jpg");

        let operation = UploadFileOperation::new(
            Arc::new(ObjectStoreGateway::in_memory("artifacts")),
            UploadOptions {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(1),
                },
                ..UploadOptions::default()
            },
        );
        let registry = InFlightRegistry::new();
        let outcome = operation
            .run(task_for(&registry, temp_dir.path(), &path))
            .await;

        assert!(matches!(outcome, UploadOutcome::SourceVanished { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_changed_after_queue_is_not_uploaded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("late.tif");
        std::fs::write(&path, b"short").unwrap();

        let gateway = Arc::new(ObjectStoreGateway::in_memory("artifacts"));
        let operation = UploadFileOperation::new(gateway.clone(), UploadOptions::default());
        let registry = InFlightRegistry::new();
        let task = task_for(&registry, temp_dir.path(), &path);

        std::fs::write(&path, b"longer contents").unwrap();
        let outcome = operation.run(task).await;

        assert!(matches!(
            outcome,
            UploadOutcome::VerificationMismatch {
                local_size: 15,
                remote_size: None,
                ..
            }
        ));
        assert!(!outcome.is_delivered());
        assert!(path.exists());
        assert!(registry.is_empty());
        assert!(matches!(
            gateway.head_object("raw/late.tif").await,
            Err(SpillError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_failure_still_counts_as_delivered() {
        let temp_dir = tempfile::tempdir().unwrap();
        // unlink refuses directories, even for root
        let path = temp_dir.path().join("stuck.jpg");
        std::fs::create_dir(&path).unwrap();

        let outcome = settle_source(&path, "raw/stuck.jpg", 7, true).await;

        assert!(outcome.is_delivered());
        assert!(matches!(
            outcome,
            UploadOutcome::DeliveredButRetained {
                size: 7,
                reason: RetainReason::DeleteFailed(_),
                ..
            }
        ));
        assert!(path.exists());
    }
}
