//! Spillway Core - drains a directory that a producer writes into, shipping
//! each finished file to object storage.
//!
//! - polling scanner with a per-path quiet period (no change notifications)
//! - in-flight registry so a path is never uploaded twice at once
//! - bounded worker pool running upload, HEAD verification, then delete

pub mod config;
pub mod error;
pub mod operations;
pub mod pipeline;
pub mod scanner;
pub mod storage;
pub mod tracking;
pub mod worker_pool;

pub use config::{PipelineConfig, RetryPolicy, normalize_prefix, parse_metadata_pairs};
pub use error::{Result, SpillError};
pub use operations::{
    MD5_METADATA_KEY, RetainReason, UploadFileOperation, UploadOptions, UploadOutcome, UploadTask,
    object_key_for,
};
pub use pipeline::{Pipeline, PipelineReport};
pub use scanner::{ExtensionFilter, ScanReport, Scanner};
pub use storage::{
    DynStorageGateway, FileDigest, GatewayBuilder, ObjectHead, ObjectStoreGateway, S3Gateway,
    S3Options, StorageGateway, compute_file_digest, compute_hash,
};
pub use tracking::{FileSnapshot, InFlightGuard, InFlightRegistry, StabilityTracker};
pub use worker_pool::{OutcomeSummary, WorkerPool};
