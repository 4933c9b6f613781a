//! Staged upload content on local disk.
//!
//! Each provisional item that carries file content owns the directory
//! `<artifact_root>/<provisional id>/`. The directory is removed once the
//! upload that needed it has completed, or when the item is discarded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Scoped handle on an artifact directory; removes it on drop unless
/// [`keep`](Self::keep) is called. Removing an absent directory is a no-op,
/// so completing the same upload twice is harmless.
#[derive(Debug)]
pub(crate) struct ArtifactDir {
    path: PathBuf,
    keep: bool,
}

impl ArtifactDir {
    /// Creates the directory for `item_id`.
    pub(crate) fn create(root: &Path, item_id: &str) -> io::Result<Self> {
        let path = artifact_path(root, item_id);
        fs::create_dir_all(&path)?;
        Ok(Self { path, keep: false })
    }

    /// Takes over the directory for `item_id`, which may not exist.
    pub(crate) fn claim(root: &Path, item_id: &str) -> Self {
        Self {
            path: artifact_path(root, item_id),
            keep: false,
        }
    }

    /// Path of a file inside the directory.
    pub(crate) fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Disarms the guard, leaving the directory in place.
    pub(crate) fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        if !self.keep {
            remove_dir(&self.path);
        }
    }
}

/// Directory holding the staged content of `item_id`.
pub(crate) fn artifact_path(root: &Path, item_id: &str) -> PathBuf {
    root.join(item_id)
}

/// Removes the artifact directory of `item_id` if present.
pub(crate) fn purge_artifact(root: &Path, item_id: &str) {
    remove_dir(&artifact_path(root, item_id));
}

fn remove_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "removed staged artifact"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove staged artifact"),
    }
}

/// Moves a file, copying across filesystems when a rename is refused.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(from = %from.display(), error = %rename_err, "rename failed; copying");
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Unix seconds of a filesystem timestamp.
pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
