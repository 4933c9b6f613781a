//! The mirrored item row.

use crate::domain::{Domain, DomainId, ROOT_ITEM_ID};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content type recorded for directories.
pub const DIRECTORY_CONTENT_TYPE: &str = "public.folder";

/// Content type recorded when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload lifecycle of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UploadState {
    /// Never uploaded, or the last attempt failed (see `upload_error`).
    #[default]
    NotStarted,
    /// An upload or remote directory creation is in flight.
    Uploading,
    /// The remote side has the item.
    Uploaded,
}

/// Download lifecycle of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DownloadState {
    /// Content is not present locally.
    #[default]
    NotStarted,
    /// A download is in flight.
    Downloading,
    /// Content is present locally.
    Downloaded,
    /// The local staged copy is waiting to be purged.
    PendingLocalDelete,
}

/// A file or directory mirrored from a remote domain.
///
/// Rows are keyed by `(domain, id)`. Ids are either remote-issued
/// (decimal strings) or provisional UUIDs minted for locally staged items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Remote id, provisional id, or [`ROOT_ITEM_ID`].
    pub id: String,
    /// Parent directory id; empty only for the root.
    pub parent_id: String,
    /// File name, unique among siblings.
    pub name: String,
    /// Owning domain.
    pub domain: DomainId,
    /// Content type; [`DIRECTORY_CONTENT_TYPE`] marks directories.
    pub content_type: String,
    /// Byte length for files, child count for directories.
    pub size: i64,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Modification time, unix seconds.
    pub modified_at: i64,
    /// Last change anchor applied to this directory (0 for files).
    pub anchor: i64,
    /// Upload lifecycle.
    pub upload_state: UploadState,
    /// Message from the last failed upload.
    pub upload_error: Option<String>,
    /// Download lifecycle.
    pub download_state: DownloadState,
    /// Message from the last failed download.
    pub download_error: Option<String>,
    /// Provisional id this row carried before it was absorbed by a remote id.
    pub origin_id: Option<String>,
}

impl Item {
    /// The bootstrap root row for a domain.
    #[must_use]
    pub fn root(domain: &Domain) -> Self {
        let now = now_seconds();
        Self {
            id: ROOT_ITEM_ID.to_string(),
            parent_id: String::new(),
            name: domain.display_name.clone(),
            domain: domain.id,
            content_type: DIRECTORY_CONTENT_TYPE.to_string(),
            size: 0,
            created_at: now,
            modified_at: now,
            anchor: 0,
            upload_state: UploadState::Uploaded,
            upload_error: None,
            download_state: DownloadState::Downloaded,
            download_error: None,
            origin_id: None,
        }
    }

    /// A fresh row placed under `parent`, inheriting its domain.
    ///
    /// Lifecycle fields start at their defaults; callers adjust them.
    #[must_use]
    pub fn child_of(
        parent: &Item,
        id: impl Into<String>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let now = now_seconds();
        Self {
            id: id.into(),
            parent_id: parent.id.clone(),
            name: name.into(),
            domain: parent.domain,
            content_type: content_type.into(),
            size: 0,
            created_at: now,
            modified_at: now,
            anchor: 0,
            upload_state: UploadState::NotStarted,
            upload_error: None,
            download_state: DownloadState::NotStarted,
            download_error: None,
            origin_id: None,
        }
    }

    /// Whether this row is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.content_type == DIRECTORY_CONTENT_TYPE
    }

    /// Whether this row is a domain root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// Whether this row still carries a locally minted id.
    ///
    /// Remote-issued rows are always uploaded. A staged row keeps its
    /// provisional id while uploading, after a failed upload, and after a
    /// successful upload until an enumeration absorbs it.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        match self.upload_state {
            UploadState::NotStarted | UploadState::Uploading => true,
            UploadState::Uploaded => {
                self.download_state == DownloadState::PendingLocalDelete
                    && self.origin_id.is_none()
            }
        }
    }

    /// Download state a row settles into once nothing local is pending.
    #[must_use]
    pub fn settled_download_state(&self) -> DownloadState {
        if self.is_directory() {
            DownloadState::Downloaded
        } else {
            DownloadState::NotStarted
        }
    }
}

/// Generates a new provisional item id.
#[must_use]
pub fn new_provisional_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time in unix seconds.
#[must_use]
pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
