use crate::short_id::ShortId;
use thiserror::Error;
use uuid::Uuid;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A record failed field validation before anything was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("id must not be nil")]
    NilId,
    #[error("user id must not be nil")]
    NilUserId,
    #[error("invalid short id: {0}")]
    InvalidShortId(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Only the delete pipeline may set the tombstone.
    #[error("new record must not be marked deleted")]
    AlreadyDeleted,
    #[error("record [{index}]: {source}")]
    AtIndex {
        index: usize,
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Wraps the error with the position of the offending element in a batch.
    pub fn at_index(self, index: usize) -> Self {
        Self::AtIndex {
            index,
            source: Box::new(self),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The url is already stored. Callers branch on this, it is not a failure.
    #[error("url already shortened as {existing}")]
    Conflict { existing: ShortId },
    #[error("short id generation gave up after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
    #[error("short id already exists: {0}")]
    ShortIdTaken(String),
    #[error("user not found: {0}")]
    UserNotFound(Uuid),
    #[error("storage database is not initialized")]
    NotInitialized,
    #[error("storage is closed")]
    Closed,
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
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
