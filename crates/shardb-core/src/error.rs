use thiserror::Error;

/// Canonical error type shared across the sharded store.
///
/// Every variant maps to exactly one wire error code from the taxonomy in
/// the external interface (`code()`), which the HTTP layer uses to build
/// the `{error:{code,message,details?}}` envelope and pick a status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} `{id}` already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("document exceeds maximum size of {max_bytes} bytes")]
    DocumentTooLarge { max_bytes: usize },

    #[error("no shards available for {0}")]
    NoShardsAvailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("query timed out after {0}ms")]
    QueryTimeout(u64),

    #[error("transaction timed out after {0}ms")]
    TransactionTimeout(u64),

    #[error("hash ring is empty")]
    EmptyRing,

    #[error("no candidate nodes supplied")]
    NoCandidates,

    #[error("network error: {0}")]
    Network(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("system overloaded: {0}")]
    SystemOverloaded(String),
}

impl Error {
    /// Returns the wire error code used by the HTTP layer.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { entity, .. } => match *entity {
                "document" => "DOCUMENT_NOT_FOUND",
                "shard" => "SHARD_NOT_FOUND",
                "transaction" => "TRANSACTION_NOT_FOUND",
                "node" => "NODE_NOT_FOUND",
                _ => "NOT_FOUND",
            },
            Error::AlreadyExists { .. } => "DOCUMENT_ALREADY_EXISTS",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::InvalidDocument(_) => "INVALID_DOCUMENT",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::DocumentTooLarge { .. } => "DOCUMENT_TOO_LARGE",
            Error::NoShardsAvailable(_) => "NO_SHARDS_AVAILABLE",
            Error::Conflict(_) => "CONFLICT",
            Error::TransactionConflict(_) => "TRANSACTION_CONFLICT",
            Error::QueryTimeout(_) => "QUERY_TIMEOUT",
            Error::TransactionTimeout(_) => "TRANSACTION_TIMEOUT",
            Error::EmptyRing => "NO_SHARDS_AVAILABLE",
            Error::NoCandidates => "INVALID_REQUEST",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::SystemOverloaded(_) => "SYSTEM_OVERLOADED",
        }
    }

    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

/// Convenient result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;
