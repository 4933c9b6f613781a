//! Error types for the sync engine.

use storemirror_protocol::ProtocolError;
use storemirror_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store answered but refused the request.
    #[error("remote rejected request ({status}): {message}")]
    Rejected {
        /// Remote status code.
        status: u16,
        /// Remote message.
        message: String,
    },

    /// A remote payload or opaque token could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Codec error while producing a token.
    #[error("codec error: {0}")]
    Codec(String),

    /// No row with this id exists in the domain.
    #[error("item {id} not found in domain {domain}")]
    NotFound {
        /// Domain identifier.
        domain: String,
        /// Item id.
        id: String,
    },

    /// A sibling already uses the requested name.
    #[error("{name:?} already exists under {parent_id} in domain {domain} (item {existing_id})")]
    Collision {
        /// Domain identifier.
        domain: String,
        /// Parent directory id.
        parent_id: String,
        /// Requested name.
        name: String,
        /// Id of the row holding the name.
        existing_id: String,
    },

    /// The item is in the wrong state for the operation.
    #[error("invalid state: {0}")]
    State(String),

    /// Domain identifier is not registered.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// Metadata store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol value error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transfer was cancelled before completing.
    #[error("transfer cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a rejection error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            domain: domain.into(),
            id: id.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::rejected(503, "busy").is_retryable());
        assert!(!SyncError::rejected(409, "exists").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::not_found("files", "42");
        assert_eq!(err.to_string(), "item 42 not found in domain files");

        let err = SyncError::Collision {
            domain: "files".into(),
            parent_id: "root".into(),
            name: "a.txt".into(),
            existing_id: "7".into(),
        };
        assert!(err.to_string().contains("\"a.txt\" already exists"));
    }

    #[test]
    fn store_errors_convert() {
        let err: SyncError = StoreError::Closed.into();
        assert!(matches!(err, SyncError::Store(StoreError::Closed)));
    }
}
