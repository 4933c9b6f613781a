//! Transfer task identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a transfer as `"<domain>/<item id>"`.
///
/// The domain part never contains `/`; the item id may.
///
/// # Example
///
/// ```rust
/// use storemirror_protocol::TaskId;
///
/// let task: TaskId = "files/1b4e28ba".parse().unwrap();
/// assert_eq!(task.domain(), "files");
/// assert_eq!(task.item_id(), "1b4e28ba");
/// assert_eq!(task.to_string(), "files/1b4e28ba");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    domain: String,
    item_id: String,
}

impl TaskId {
    /// Creates a task id.
    ///
    /// # Errors
    ///
    /// Returns `MalformedTaskId` if either part is empty or the domain
    /// contains `/`.
    pub fn new(domain: impl Into<String>, item_id: impl Into<String>) -> ProtocolResult<Self> {
        let domain = domain.into();
        let item_id = item_id.into();
        let malformed = |reason| ProtocolError::MalformedTaskId {
            value: format!("{domain}/{item_id}"),
            reason,
        };

        if domain.is_empty() {
            return Err(malformed("empty domain"));
        }
        if domain.contains('/') {
            return Err(malformed("domain contains '/'"));
        }
        if item_id.is_empty() {
            return Err(malformed("empty item id"));
        }
        Ok(Self { domain, item_id })
    }

    /// The domain identifier.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The item id.
    #[must_use]
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.item_id)
    }
}

impl FromStr for TaskId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, item_id) = s.split_once('/').ok_or(ProtocolError::MalformedTaskId {
            value: s.to_string(),
            reason: "missing '/'",
        })?;
        Self::new(domain, item_id)
    }
}
