//! Storage modules for Spillway
//!
//! Provides streaming digests and the object storage gateways.

pub mod digest;
pub mod factory;
pub mod gateway;
pub mod s3;

pub use digest::{DIGEST_CHUNK_SIZE, FileDigest, compute_file_digest, compute_hash};
pub use factory::GatewayBuilder;
pub use gateway::{DynStorageGateway, ObjectHead, ObjectStoreGateway, StorageGateway};
pub use s3::{S3Gateway, S3Options};
