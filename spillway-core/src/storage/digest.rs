use crate::error::Result;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Read size for streaming digests
pub const DIGEST_CHUNK_SIZE: usize = 1024 * 1024;

/// Content digest of a local file, taken in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub md5_hex: String,
    /// Bytes actually read while hashing
    pub bytes_read: u64,
}

/// Stream a file through MD5 without holding more than one chunk in memory
pub async fn compute_file_digest(path: &Path) -> Result<FileDigest> {
    let mut file = fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];
    let mut bytes_read = 0u64;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
        bytes_read += read as u64;
    }

    Ok(FileDigest {
        md5_hex: hex::encode(context.compute().0),
        bytes_read,
    })
}

/// Compute MD5 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        assert_eq!(compute_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(compute_hash(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[tokio::test]
    async fn test_file_digest_spans_chunks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("frame.tif");
        let data: Vec<u8> = (0..(DIGEST_CHUNK_SIZE * 2 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        std::fs::write(&path, &data).unwrap();

        let digest = compute_file_digest(&path).await.unwrap();
        assert_eq!(digest.bytes_read, data.len() as u64);
        assert_eq!(digest.md5_hex, compute_hash(&data));
    }

    #[tokio::test]
    async fn test_file_digest_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let error = compute_file_digest(&temp_dir.path().join("gone.jpg"))
            .await
            .unwrap_err();
        assert!(error.is_not_found_io());
    }
}
