use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpillError>;

#[derive(Debug, Error)]
pub enum SpillError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("storage transport error: {0}")]
    Transport(String),

    #[error("storage rejected credentials: {0}")]
    Auth(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SpillError {
    /// Errors raised by the storage backend rather than the local filesystem.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            SpillError::Transport(_) | SpillError::Auth(_) | SpillError::ObjectNotFound(_)
        )
    }

    /// True when the local source file disappeared underneath us.
    pub fn is_not_found_io(&self) -> bool {
        matches!(self, SpillError::Io(error) if error.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<object_store::Error> for SpillError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => SpillError::ObjectNotFound(path),
            other => SpillError::Transport(other.to_string()),
        }
    }
}
