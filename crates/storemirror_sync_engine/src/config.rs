//! Configuration for the sync engine.

use std::path::PathBuf;

/// Default page and change batch size.
pub const DEFAULT_BATCH_SIZE: u32 = 128;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Items per listing page.
    pub page_batch_size: u32,
    /// Maximum changes requested per `list_changes` call.
    pub change_batch_size: u32,
    /// Directory holding staged upload content, one subdirectory per
    /// provisional item id.
    pub artifact_root: PathBuf,
    /// Directory downloaded content is placed in.
    pub download_root: PathBuf,
}

impl SyncConfig {
    /// Creates a configuration rooted at `state_dir`.
    ///
    /// Staged uploads go to `<state_dir>/artifacts` and downloads to
    /// `<state_dir>/downloads`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            page_batch_size: DEFAULT_BATCH_SIZE,
            change_batch_size: DEFAULT_BATCH_SIZE,
            artifact_root: state_dir.join("artifacts"),
            download_root: state_dir.join("downloads"),
        }
    }

    /// Sets the listing page size.
    pub fn with_page_batch_size(mut self, size: u32) -> Self {
        self.page_batch_size = size.max(1);
        self
    }

    /// Sets the change batch size.
    pub fn with_change_batch_size(mut self, size: u32) -> Self {
        self.change_batch_size = size.max(1);
        self
    }

    /// Sets the staged upload directory.
    pub fn with_artifact_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_root = path.into();
        self
    }

    /// Sets the download directory.
    pub fn with_download_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_root = path.into();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("storemirror"))
    }
}
