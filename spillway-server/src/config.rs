use serde::{Deserialize, Serialize};
use spillway_core::config::DEFAULT_EXTENSIONS;
use spillway_core::{
    GatewayBuilder, PipelineConfig, Result, RetryPolicy, S3Options, SpillError,
    parse_metadata_pairs,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub watch_root: PathBuf,
    pub extensions: Vec<String>,
    pub include_hidden: bool,
    pub quiet_seconds: f64,
    pub scan_interval_seconds: f64,
    pub concurrency: usize,
    pub delete_after_upload: bool,
    pub max_attempts: u32,
    pub retry_backoff_seconds: f64,
    pub retry_backoff_max_seconds: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            watch_root: PathBuf::from("/data"),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            include_hidden: false,
            quiet_seconds: 5.0,
            scan_interval_seconds: 2.0,
            concurrency: 4,
            delete_after_upload: true,
            max_attempts: 3,
            retry_backoff_seconds: 2.0,
            retry_backoff_max_seconds: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: String,
    pub bucket: String,
    pub prefix: String,
    pub extra_metadata: HashMap<String, String>,
    /// `key1=val1,key2=val2`, merged over `extra_metadata`
    pub extra_metadata_pairs: Option<String>,
    pub s3: S3Section,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "s3".to_string(),
            bucket: "goes-artifacts".to_string(),
            prefix: String::new(),
            extra_metadata: HashMap::new(),
            extra_metadata_pairs: None,
            s3: S3Section::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Section {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub addressing_style: String,
}

impl Default for S3Section {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            addressing_style: "path".to_string(),
        }
    }
}

impl S3Section {
    fn to_options(&self) -> Result<S3Options> {
        let force_path_style = match self.addressing_style.trim().to_ascii_lowercase().as_str() {
            "path" => true,
            "virtual" => false,
            other => {
                return Err(SpillError::Config(format!(
                    "unsupported s3 addressing_style: {}",
                    other
                )));
            }
        };

        Ok(S3Options {
            endpoint: non_blank(&self.endpoint),
            region: self.region.trim().to_string(),
            access_key: non_blank(&self.access_key),
            secret_key: non_blank(&self.secret_key),
            force_path_style,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|error| SpillError::Config(format!("invalid {}: {} ({})", field, value, error)))
}

impl Config {
    /// File (when given) first, then `SPILLWAY__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("SPILLWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pipeline.extensions")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SpillError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| SpillError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn extra_metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.storage.extra_metadata.clone();
        if let Some(pairs) = self.storage.extra_metadata_pairs.as_deref() {
            metadata.extend(parse_metadata_pairs(pairs));
        }
        metadata
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let pipeline = &self.pipeline;
        let config = PipelineConfig {
            watch_root: pipeline.watch_root.clone(),
            extensions: pipeline
                .extensions
                .iter()
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
            include_hidden: pipeline.include_hidden,
            quiet_period: seconds("quiet_seconds", pipeline.quiet_seconds)?,
            scan_interval: seconds("scan_interval_seconds", pipeline.scan_interval_seconds)?,
            concurrency: pipeline.concurrency,
            delete_after_upload: pipeline.delete_after_upload,
            key_prefix: spillway_core::normalize_prefix(&self.storage.prefix).to_string(),
            extra_metadata: self.extra_metadata(),
            retry: RetryPolicy {
                max_attempts: pipeline.max_attempts,
                base_backoff: seconds("retry_backoff_seconds", pipeline.retry_backoff_seconds)?,
                max_backoff: seconds(
                    "retry_backoff_max_seconds",
                    pipeline.retry_backoff_max_seconds,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn gateway_builder(&self) -> Result<GatewayBuilder> {
        let mut builder = GatewayBuilder::new()
            .backend(self.storage.backend.clone())
            .bucket(self.storage.bucket.clone());

        if self.storage.backend.trim().eq_ignore_ascii_case("s3") {
            builder = builder.s3_options(self.storage.s3.to_options()?);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert() {
        let config = Config::default();
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.watch_root, PathBuf::from("/data"));
        assert_eq!(pipeline.quiet_period, Duration::from_secs(5));
        assert_eq!(pipeline.scan_interval, Duration::from_secs(2));
        assert_eq!(pipeline.concurrency, 4);
        assert!(pipeline.delete_after_upload);
        assert_eq!(pipeline.extensions.len(), DEFAULT_EXTENSIONS.len());
        assert!(config.gateway_builder().is_ok());
    }

    #[test]
    fn test_load_yaml_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("spillway.yaml");
        std::fs::write(
            &path,
            r#"
pipeline:
  watch_root: /mnt/goes
  extensions: [jpg, nc]
  quiet_seconds: 0.5
  concurrency: 8
  delete_after_upload: false
storage:
  backend: memory
  bucket: archive
  prefix: /raw/
  extra_metadata:
    site: east
  extra_metadata_pairs: "band=13, site=west"
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.watch_root, PathBuf::from("/mnt/goes"));
        assert_eq!(pipeline.extensions, vec!["jpg", "nc"]);
        assert_eq!(pipeline.quiet_period, Duration::from_millis(500));
        assert_eq!(pipeline.concurrency, 8);
        assert!(!pipeline.delete_after_upload);
        assert_eq!(pipeline.key_prefix, "raw");
        assert_eq!(pipeline.extra_metadata.get("site").map(String::as_str), Some("west"));
        assert_eq!(pipeline.extra_metadata.get("band").map(String::as_str), Some("13"));
        assert_eq!(config.storage.bucket, "archive");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.quiet_seconds = -1.0;
        assert!(matches!(config.pipeline_config(), Err(SpillError::Config(_))));

        let mut config = Config::default();
        config.pipeline.concurrency = 0;
        assert!(config.pipeline_config().is_err());

        let mut config = Config::default();
        config.storage.s3.addressing_style = "sideways".to_string();
        assert!(config.gateway_builder().is_err());
    }
}
