//! Error types for repository operations.

use thiserror::Error;

/// Repository error type.
///
/// The enum is `Clone` so that a single transport failure can be reported
/// to every item callback of a bulk batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// Document not found.
    #[error("Document not found: {index}/{id}")]
    NotFound {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// The stored version differs from the version the writer read.
    #[error("Version conflict on {index}/{id}")]
    VersionConflict {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// `update` kept hitting version conflicts until its retries ran out.
    #[error("Update of {index}/{id} gave up after {attempts} conflicting attempts")]
    UpdateConflictExhausted {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
        /// Number of write attempts made.
        attempts: u32,
    },

    /// Malformed request or mapping mismatch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store could not be reached.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// `refresh()` called on a repository whose policy forbids it.
    #[error("Refresh is not allowed on index {index}")]
    RefreshNotAllowed {
        /// Index name.
        index: String,
    },

    /// The operation was abandoned before its outcome was known.
    #[error("Operation cancelled")]
    Cancelled,

    /// The store answered with a server-side failure.
    #[error("Server error ({status}): {reason}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error reason reported by the store.
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RepositoryError {
    /// Create a not-found error.
    pub fn not_found(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            index: index.into(),
            id: id.into(),
        }
    }

    /// Create a version conflict error.
    pub fn conflict(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self::VersionConflict {
            index: index.into(),
            id: id.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Map an HTTP status and reason returned for a document operation.
    ///
    /// 404 and 409 need the document coordinates; everything else is
    /// classified by status class.
    pub fn from_status(status: u16, reason: impl Into<String>, index: &str, id: &str) -> Self {
        match status {
            404 => Self::not_found(index, id),
            409 => Self::conflict(index, id),
            429 => Self::Server {
                status,
                reason: reason.into(),
            },
            400..=499 => Self::Validation(reason.into()),
            _ => Self::Server {
                status,
                reason: reason.into(),
            },
        }
    }

    /// Whether this is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<opensearch::Error> for RepositoryError {
    fn from(err: opensearch::Error) -> Self {
        match err.status_code() {
            Some(status) => Self::Server {
                status: status.as_u16(),
                reason: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
