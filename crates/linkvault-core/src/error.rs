use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("short id must not be empty")]
    EmptyIdentifier,
    /// The user already shortened this URL; carries the existing short id.
    #[error("url is already shortened as {0}")]
    DuplicateUrl(String),
    #[error("short id already exists: {0}")]
    Conflict(String),
    #[error("short url not found: {0}")]
    NotFound(String),
    #[error("short url has been deleted: {0}")]
    Gone(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("event log is corrupt at line {line}: {message}")]
    ReplayCorruption { line: usize, message: String },
    #[error("schema migration failed: {0}")]
    Migration(String),
    #[error("identifier generation failed: {0}")]
    Generator(String),
}

impl StorageError {
    /// Returns the pre-existing short id when this is a duplicate URL signal.
    pub fn existing_short_id(&self) -> Option<&str> {
        match self {
            StorageError::DuplicateUrl(id) => Some(id),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
