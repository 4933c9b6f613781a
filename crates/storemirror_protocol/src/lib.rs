//! # Storemirror Protocol
//!
//! Types exchanged with the remote store and between the sync engine and
//! its transfer workers.
//!
//! - [`RemoteItem`]: one remote file or directory
//! - [`DirectoryChanges`]: a batch of changes to one directory since an anchor
//! - [`TaskId`]: the `"<domain>/<item id>"` identifier of a transfer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod remote;
mod task;

pub use error::{ProtocolError, ProtocolResult};
pub use remote::{DirectoryChanges, RemoteItem, REMOTE_FOLDER_TYPE};
pub use task::TaskId;
