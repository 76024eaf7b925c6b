use thiserror::Error;

/// Errors from repository operations (used by trait definitions in chatsync-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Typed failures of the sync merge and chat query paths.
///
/// The HTTP boundary maps these to 400 / 403 / 409 / 404 / 500.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("caller is not a member of this chat")]
    Forbidden,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chat not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for ChatError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ChatError::NotFound,
            RepositoryError::Conflict(msg) => ChatError::Conflict(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

/// Failures of the on-device session cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Failures talking to the remote chat API.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote is not configured or not authenticated")]
    NotAuthenticated,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid remote response: {0}")]
    Decode(String),
}

/// Errors surfaced by the local session store.
///
/// Cache failures propagate (local storage availability is assumed);
/// remote failures only appear from explicit remote calls, never from
/// background sync.
#[derive(Debug, Clone, Error)]
pub enum SessionStoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),
}
