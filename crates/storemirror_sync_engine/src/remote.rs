//! Remote store client abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use storemirror_protocol::{DirectoryChanges, RemoteItem};

/// Client for the remote file store.
///
/// Metadata calls are synchronous request/response exchanges; content
/// transfers are asynchronous. Implementations must be thread-safe.
///
/// # Implementors
///
/// - [`MockRemote`](crate::MockRemote) - in-memory store for testing
#[async_trait]
pub trait RemoteStoreClient: Send + Sync + 'static {
    /// Fetches current metadata for one item.
    ///
    /// # Errors
    ///
    /// Returns `Transport` when unreachable and `Rejected` when the remote
    /// refuses (for example 404 for an unknown id).
    fn get_item_info(&self, id: &str) -> SyncResult<RemoteItem>;

    /// Lists at most `max_count` changes to `directory_id` after `since`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` when unreachable and `Rejected` when the
    /// directory is unknown to the remote.
    fn list_changes(
        &self,
        directory_id: &str,
        since: i64,
        max_count: u32,
    ) -> SyncResult<DirectoryChanges>;

    /// Creates a directory named `name` under `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the parent is unknown or the name is taken.
    fn create_directory(&self, parent_id: &str, name: &str) -> SyncResult<RemoteItem>;

    /// Uploads a local file as `name` under `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as for
    /// [`create_directory`](Self::create_directory).
    async fn upload(&self, local_path: &Path, parent_id: &str, name: &str)
        -> SyncResult<RemoteItem>;

    /// Downloads an item's content and returns where it was written.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for unknown ids or directories.
    async fn download(&self, id: &str) -> SyncResult<PathBuf>;
}
