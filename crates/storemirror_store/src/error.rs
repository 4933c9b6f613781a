//! Error types for the metadata store.

use crate::domain::DomainId;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in metadata store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal contains a record that cannot be replayed.
    #[error("journal corrupted at offset {offset}: {message}")]
    JournalCorrupted {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Invalid store layout or configuration.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A domain identifier that is not registered.
    #[error("unknown domain: {identifier}")]
    UnknownDomain {
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// Two rows would share a name under the same parent.
    #[error("duplicate item {name:?} under {parent_id:?} in domain {domain}")]
    DuplicateItem {
        /// Domain of the clash.
        domain: DomainId,
        /// Parent directory identifier.
        parent_id: String,
        /// The clashing name.
        name: String,
    },

    /// A transaction was rolled back.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorrupted {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unknown domain error.
    pub fn unknown_domain(identifier: impl Into<String>) -> Self {
        Self::UnknownDomain {
            identifier: identifier.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
