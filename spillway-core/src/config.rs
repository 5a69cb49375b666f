use crate::{Result, SpillError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "pdf"];

/// Runtime settings for one scanner/worker-pool pairing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub watch_root: PathBuf,
    pub extensions: Vec<String>,
    pub include_hidden: bool,
    pub quiet_period: Duration,
    pub scan_interval: Duration,
    pub concurrency: usize,
    pub delete_after_upload: bool,
    pub key_prefix: String,
    pub extra_metadata: HashMap<String, String>,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_root: PathBuf::from("/data"),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            include_hidden: false,
            quiet_period: Duration::from_secs(5),
            scan_interval: Duration::from_secs(2),
            concurrency: 4,
            delete_after_upload: true,
            key_prefix: String::new(),
            extra_metadata: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SpillError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if self.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(SpillError::Config(
                "extension allow-list cannot be empty".to_string(),
            ));
        }

        if self.scan_interval.is_zero() {
            return Err(SpillError::Config(
                "scan interval must be greater than zero".to_string(),
            ));
        }

        self.retry.validate()
    }

    /// Prefix with surrounding whitespace and slashes removed.
    pub fn normalized_prefix(&self) -> &str {
        normalize_prefix(&self.key_prefix)
    }
}

/// In-task retry for storage errors. Verification mismatches are never retried here.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SpillError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim().trim_matches('/')
}

/// Parses `key1=val1,key2=val2`. Pairs without `=` and blank keys are dropped.
pub fn parse_metadata_pairs(raw: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        metadata.insert(key.to_string(), value.trim().to_string());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_pairs() {
        let parsed = parse_metadata_pairs(" site = goes-east ,bad,=nokey,band=13=ir");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("site").map(String::as_str), Some("goes-east"));
        assert_eq!(parsed.get("band").map(String::as_str), Some("13=ir"));
        assert!(parse_metadata_pairs("").is_empty());
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(" /raw/goes/ "), "raw/goes");
        assert_eq!(normalize_prefix("///"), "");
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PipelineConfig {
            concurrency: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SpillError::Config(_))));
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
