use super::gateway::{DynStorageGateway, ObjectStoreGateway};
use super::s3::{S3Gateway, S3Options};
use crate::{Result, SpillError};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct GatewayBuilder {
    backend: Option<String>,
    bucket: Option<String>,
    s3_options: Option<S3Options>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn s3_options(mut self, options: S3Options) -> Self {
        self.s3_options = Some(options);
        self
    }

    fn resolve_bucket(&self) -> Result<String> {
        let bucket = self
            .bucket
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if bucket.is_empty() {
            return Err(SpillError::Config(
                "storage bucket cannot be empty".to_string(),
            ));
        }

        Ok(bucket)
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(SpillError::Config(
                "storage backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub async fn build(&self) -> Result<DynStorageGateway> {
        let bucket = self.resolve_bucket()?;
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "s3" => {
                let options = self.s3_options.clone().unwrap_or_default();
                let gateway = S3Gateway::connect(bucket, options).await?;
                Ok(Arc::new(gateway))
            }
            "memory" => {
                tracing::warn!(
                    "Using in-memory storage backend for bucket {}; uploads are not persisted",
                    bucket
                );
                Ok(Arc::new(ObjectStoreGateway::in_memory(bucket)))
            }
            other => Err(SpillError::Config(format!(
                "unsupported storage backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_backend() {
        let gateway = GatewayBuilder::new()
            .backend(" Memory ")
            .bucket("artifacts")
            .build()
            .await
            .unwrap();
        assert_eq!(gateway.bucket(), "artifacts");
        gateway.ensure_bucket().await.unwrap();
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_backend() {
        let result = GatewayBuilder::new()
            .backend("gcs")
            .bucket("artifacts")
            .build()
            .await;
        assert!(matches!(result, Err(SpillError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_empty_bucket() {
        let result = GatewayBuilder::new().backend("memory").bucket("  ").build().await;
        assert!(matches!(result, Err(SpillError::Config(_))));
    }
}
