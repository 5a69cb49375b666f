//! S3 gateway built on aws-sdk-s3: bucket bootstrap, streamed puts and HEAD probes.

use super::gateway::{ObjectHead, StorageGateway};
use crate::{Result, SpillError};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Options {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), safest for MinIO
    pub force_path_style: bool,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
        }
    }
}

pub struct S3Gateway {
    client: Client,
    bucket: String,
    region: String,
}

impl S3Gateway {
    pub async fn connect(bucket: impl Into<String>, options: S3Options) -> Result<Self> {
        let bucket = bucket.into();
        let region = if options.region.trim().is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            options.region.trim().to_string()
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.clone()));

        match (options.access_key, options.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key, secret_key, None, None, "spillway",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(SpillError::Config(
                    "s3 access_key and secret_key must be set together".to_string(),
                ));
            }
        }

        if let Some(endpoint) = options
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(options.force_path_style)
            .build();

        tracing::info!(
            "S3 gateway ready bucket={} region={} path_style={}",
            bucket,
            region,
            options.force_path_style
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket,
            region,
        })
    }

    async fn create_bucket(&self) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(error) => Err(classify_sdk_error("create_bucket", &self.bucket, error)),
        }
    }
}

#[async_trait]
impl StorageGateway for S3Gateway {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::info!("Bucket exists: {}", self.bucket);
                Ok(())
            }
            Err(error) if response_status(&error) == Some(404) => {
                tracing::info!("Creating bucket: {}", self.bucket);
                self.create_bucket().await
            }
            Err(error) => Err(classify_sdk_error("head_bucket", &self.bucket, error)),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let body = ByteStream::from_path(source).await.map_err(|error| {
            // Surface a vanished source as a local io error, not a transport one.
            if !source.exists() {
                SpillError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: {}", source.display(), error),
                ))
            } else {
                SpillError::Io(std::io::Error::other(error.to_string()))
            }
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|error| classify_sdk_error("put_object", key, error))?;

        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead> {
        let output = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(error)
                if error.as_service_error().is_some_and(|e| e.is_not_found())
                    || response_status(&error) == Some(404) =>
            {
                return Err(SpillError::ObjectNotFound(key.to_string()));
            }
            Err(error) => return Err(classify_sdk_error("head_object", key, error)),
        };

        let size = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .ok_or_else(|| {
                SpillError::Transport(format!("head_object {}: missing content length", key))
            })?;

        Ok(ObjectHead {
            size,
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }
}

fn response_status<E>(error: &SdkError<E, HttpResponse>) -> Option<u16> {
    error
        .raw_response()
        .map(|response| response.status().as_u16())
}

/// Maps SDK failures onto the crate taxonomy: 401/403 are credential problems,
/// anything else (dispatch, timeout, 5xx) is transport.
fn classify_sdk_error<E>(operation: &str, target: &str, error: SdkError<E, HttpResponse>) -> SpillError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = response_status(&error);
    let message = format!("{} {}: {}", operation, target, DisplayErrorContext(error));
    match status {
        Some(401) | Some(403) => SpillError::Auth(message),
        _ => SpillError::Transport(message),
    }
}
