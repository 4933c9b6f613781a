//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A task identifier is not of the form `<domain>/<item id>`.
    #[error("malformed task id {value:?}: {reason}")]
    MalformedTaskId {
        /// The rejected input.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}
