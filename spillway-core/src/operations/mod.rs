pub mod upload_file;

pub use upload_file::{
    MD5_METADATA_KEY, RetainReason, SharedUploadOperation, UploadFileOperation, UploadOptions,
    UploadOutcome, UploadTask, object_key_for,
};
