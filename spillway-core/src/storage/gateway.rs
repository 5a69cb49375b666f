use crate::error::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectStore, PutMultipartOpts,
    WriteMultipart,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Part size used when streaming a file through multipart writes
pub const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Parts allowed in flight before the reader waits
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Result of a metadata-only probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub metadata: HashMap<String, String>,
}

/// Object storage capability bound to a single bucket.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    fn bucket(&self) -> &str;

    /// Idempotent; creates the bucket when the backend reports it missing.
    async fn ensure_bucket(&self) -> Result<()>;

    /// Stream `source` into `key` with user metadata attached.
    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    async fn head_object(&self, key: &str) -> Result<ObjectHead>;
}

pub type DynStorageGateway = Arc<dyn StorageGateway>;

/// Gateway over any `object_store` backend. Buckets are implicit in the store.
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreGateway {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), bucket)
    }
}

/// Copy a file into the writer, holding at most `MAX_PARTS_IN_FLIGHT` parts in
/// memory, and wait for every part to land.
async fn stream_file(file: &mut tokio::fs::File, writer: &mut WriteMultipart) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
    loop {
        buffer.clear();
        if file.read_buf(&mut buffer).await? == 0 {
            break;
        }
        writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
        writer.put(buffer.split().freeze());
        buffer.reserve(UPLOAD_CHUNK_SIZE);
    }
    writer.wait_for_capacity(0).await?;
    Ok(())
}

#[async_trait]
impl StorageGateway for ObjectStoreGateway {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<()> {
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut attributes = Attributes::new();
        for (name, value) in metadata {
            attributes.insert(
                Attribute::Metadata(name.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }

        let location = ObjectPath::from(key);
        let upload = self
            .store
            .put_multipart_opts(
                &location,
                PutMultipartOpts {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_CHUNK_SIZE);

        let mut file = match tokio::fs::File::open(source).await {
            Ok(file) => file,
            Err(error) => {
                writer.abort().await?;
                return Err(error.into());
            }
        };

        if let Err(error) = stream_file(&mut file, &mut writer).await {
            writer.abort().await?;
            return Err(error);
        }

        writer.finish().await?;
        tracing::debug!("Stored object {} in bucket {}", key, self.bucket);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead> {
        let location = ObjectPath::from(key);
        let result = self
            .store
            .get_opts(
                &location,
                GetOptions {
                    head: true,
                    ..Default::default()
                },
            )
            .await?;

        let mut metadata = HashMap::new();
        for (attribute, value) in result.attributes.iter() {
            if let Attribute::Metadata(name) = attribute {
                metadata.insert(name.to_string(), value.to_string());
            }
        }

        Ok(ObjectHead {
            size: result.meta.size as u64,
            metadata,
        })
    }
}
