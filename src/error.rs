/// Central error types for the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Database error (rusqlite)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid TOML configuration
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
    /// Another thread panicked while holding the database connection
    #[error("Database connection lock poisoned")]
    LockPoisoned,
    /// Stored value does not match any known variant
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by a remote collaborator (synchronizer, object storage)
///
/// Never propagated out of a cycle: the message is recorded on the queue item
/// and `retryable` decides whether the item gets another attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub retryable: bool,
}

impl RemoteError {
    /// Network failures, timeouts, 5xx: try again next cycle
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Malformed payload, missing record, 4xx: retrying cannot help
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<webdav_storage::StorageError> for RemoteError {
    fn from(err: webdav_storage::StorageError) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}
