//! Local mutations staged ahead of remote confirmation.
//!
//! A staged item is written as a provisional row in `uploading` state and
//! returned right away; the remote call runs later as a transfer. All
//! validation happens before the row is written, so a rejected call leaves
//! no trace.

use crate::artifact::{artifact_path, move_file, purge_artifact, unix_seconds, ArtifactDir};
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::host::FilesystemHost;
use crate::remote::RemoteStoreClient;
use crate::transfer::{TransferJob, TransferKind};
use std::fs;
use std::path::Path;
use storemirror_protocol::TaskId;
use storemirror_store::{
    new_provisional_id, now_seconds, Domain, DownloadState, Item, Transaction, UploadState,
    DEFAULT_CONTENT_TYPE, DIRECTORY_CONTENT_TYPE,
};
use tracing::{debug, info, warn};

impl<R: RemoteStoreClient, H: FilesystemHost> SyncEngine<R, H> {
    /// Stages a new directory named `name` under `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the parent is missing, `State` if it is not a
    /// directory or the name is unusable, and `Collision` if a sibling
    /// already uses the name ignoring case.
    pub fn stage_directory(&self, parent_id: &str, domain: &str, name: &str) -> SyncResult<Item> {
        let domain = self.domain(domain)?;
        validate_name(name)?;

        let item = self.store.transaction(|txn| {
            let parent = validate_target(txn, &domain, parent_id, name)?;
            let mut item =
                Item::child_of(&parent, new_provisional_id(), name, DIRECTORY_CONTENT_TYPE);
            item.upload_state = UploadState::Uploading;
            txn.put(item.clone());
            bump_parent_size(txn, parent, 1);
            Ok::<_, SyncError>(item)
        })?;

        info!(
            domain = %domain.identifier,
            parent_id,
            item_id = %item.id,
            name,
            "staged directory"
        );
        self.enqueue(TransferJob {
            task: TaskId::new(&domain.identifier, &item.id)?,
            kind: TransferKind::CreateDirectory {
                parent_id: parent_id.to_string(),
                name: name.to_string(),
            },
        });
        Ok(item)
    }

    /// Stages the file at `source` for upload under `parent_id`.
    ///
    /// The file is moved into the item's artifact directory before the row
    /// is written and moved back if the row cannot be written.
    ///
    /// # Errors
    ///
    /// As for [`stage_directory`](Self::stage_directory), plus `State` if
    /// `source` is not a regular file and `Io` if it cannot be moved.
    pub fn stage_import(&self, parent_id: &str, domain: &str, source: &Path) -> SyncResult<Item> {
        let domain = self.domain(domain)?;
        let metadata = fs::metadata(source)?;
        if !metadata.is_file() {
            return Err(SyncError::state(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                SyncError::state(format!("{} has no usable file name", source.display()))
            })?
            .to_string();
        validate_name(&name)?;

        // fail before touching the file
        self.store.transaction(|txn| {
            validate_target(txn, &domain, parent_id, &name).map(|_| ())
        })?;

        let id = new_provisional_id();
        let artifact = ArtifactDir::create(&self.config.artifact_root, &id)?;
        let staged = artifact.file_path(&name);
        move_file(source, &staged)?;

        let written = self.store.transaction(|txn| {
            let parent = validate_target(txn, &domain, parent_id, &name)?;
            let mut item =
                Item::child_of(&parent, id.as_str(), name.as_str(), DEFAULT_CONTENT_TYPE);
            item.size = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
            item.created_at = metadata.created().map_or(item.created_at, unix_seconds);
            item.modified_at = metadata.modified().map_or(item.modified_at, unix_seconds);
            item.upload_state = UploadState::Uploading;
            txn.put(item.clone());
            bump_parent_size(txn, parent, 1);
            Ok::<_, SyncError>(item)
        });

        let item = match written {
            Ok(item) => item,
            Err(err) => {
                if let Err(restore) = move_file(&staged, source) {
                    warn!(
                        path = %source.display(),
                        error = %restore,
                        "could not restore import source"
                    );
                    artifact.keep();
                }
                return Err(err);
            }
        };
        artifact.keep();

        info!(
            domain = %domain.identifier,
            parent_id,
            item_id = %item.id,
            name = %item.name,
            size = item.size,
            "staged import"
        );
        self.enqueue(TransferJob {
            task: TaskId::new(&domain.identifier, &item.id)?,
            kind: TransferKind::Upload {
                parent_id: parent_id.to_string(),
                name,
                source: staged,
            },
        });
        Ok(item)
    }

    /// Abandons a provisional item and everything staged beneath it.
    ///
    /// Rows are removed, running transfers aborted, and staged content
    /// deleted. Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row is missing and `State` if the remote
    /// already confirmed it.
    pub fn discard_staged(&self, id: &str, domain: &str) -> SyncResult<Vec<String>> {
        let domain = self.domain(domain)?;

        let removed = self.store.transaction(|txn| {
            let row = txn
                .get(domain.id, id)
                .ok_or_else(|| SyncError::not_found(&domain.identifier, id))?;
            if !row.is_provisional() {
                return Err(SyncError::state(format!("item {id} is not staged")));
            }
            let removed = txn.delete_subtree(domain.id, id);
            if let Some(parent) = txn.get(domain.id, &row.parent_id) {
                bump_parent_size(txn, parent, -1);
            }
            Ok::<_, SyncError>(removed)
        })?;

        for removed_id in &removed {
            if let Ok(task) = TaskId::new(&domain.identifier, removed_id) {
                self.abort_transfer(&task);
            }
            purge_artifact(&self.config.artifact_root, removed_id);
        }

        info!(
            domain = %domain.identifier,
            item_id = id,
            removed = removed.len(),
            "discarded staged item"
        );
        Ok(removed)
    }

    /// Re-submits a staged item whose upload failed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row is missing and `State` unless it is
    /// `not-started` with a recorded error and its staged content exists.
    pub fn retry_upload(&self, id: &str, domain: &str) -> SyncResult<Item> {
        let domain = self.domain(domain)?;

        let item = self.store.transaction(|txn| {
            let mut row = txn
                .get(domain.id, id)
                .ok_or_else(|| SyncError::not_found(&domain.identifier, id))?;
            if row.upload_state != UploadState::NotStarted || row.upload_error.is_none() {
                return Err(SyncError::state(format!(
                    "item {id} has no failed upload to retry"
                )));
            }
            if !row.is_directory() {
                let source = artifact_path(&self.config.artifact_root, id).join(&row.name);
                if !source.is_file() {
                    return Err(SyncError::state(format!(
                        "staged content of {id} is missing"
                    )));
                }
            }
            row.upload_state = UploadState::Uploading;
            row.upload_error = None;
            txn.put(row.clone());
            Ok::<_, SyncError>(row)
        })?;

        let kind = if item.is_directory() {
            TransferKind::CreateDirectory {
                parent_id: item.parent_id.clone(),
                name: item.name.clone(),
            }
        } else {
            TransferKind::Upload {
                parent_id: item.parent_id.clone(),
                name: item.name.clone(),
                source: artifact_path(&self.config.artifact_root, id).join(&item.name),
            }
        };

        debug!(domain = %domain.identifier, item_id = id, "retrying upload");
        self.enqueue(TransferJob {
            task: TaskId::new(&domain.identifier, id)?,
            kind,
        });
        Ok(item)
    }

    /// Starts downloading a confirmed file's content.
    ///
    /// A file that is already downloaded is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row is missing and `State` for
    /// directories, provisional rows, and downloads already running.
    pub fn request_download(&self, id: &str, domain: &str) -> SyncResult<Item> {
        let domain = self.domain(domain)?;

        let (item, start) = self.store.transaction(|txn| {
            let mut row = txn
                .get(domain.id, id)
                .ok_or_else(|| SyncError::not_found(&domain.identifier, id))?;
            if row.is_directory() {
                return Err(SyncError::state(format!("{id} is a directory")));
            }
            if row.is_provisional() {
                return Err(SyncError::state(format!(
                    "item {id} is not yet confirmed by the remote"
                )));
            }
            match row.download_state {
                DownloadState::NotStarted => {
                    row.download_state = DownloadState::Downloading;
                    row.download_error = None;
                    txn.put(row.clone());
                    Ok::<_, SyncError>((row, true))
                }
                DownloadState::Downloaded => Ok((row, false)),
                DownloadState::Downloading | DownloadState::PendingLocalDelete => Err(
                    SyncError::state(format!("item {id} is already transferring")),
                ),
            }
        })?;

        if start {
            debug!(domain = %domain.identifier, item_id = id, "requested download");
            self.enqueue(TransferJob {
                task: TaskId::new(&domain.identifier, id)?,
                kind: TransferKind::Download,
            });
        }
        Ok(item)
    }
}

fn validate_name(name: &str) -> SyncResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(SyncError::state(format!("invalid item name {name:?}")));
    }
    if name.contains(['/', '\0']) {
        return Err(SyncError::state(format!(
            "item name {name:?} contains a reserved character"
        )));
    }
    Ok(())
}

/// Returns the parent row when `name` may be created under it.
fn validate_target(
    txn: &Transaction<'_>,
    domain: &Domain,
    parent_id: &str,
    name: &str,
) -> SyncResult<Item> {
    let parent = txn
        .get(domain.id, parent_id)
        .ok_or_else(|| SyncError::not_found(&domain.identifier, parent_id))?;
    if !parent.is_directory() {
        return Err(SyncError::state(format!("{parent_id} is not a directory")));
    }
    if let Some(existing) = txn.child_named_ignore_case(domain.id, parent_id, name) {
        return Err(SyncError::Collision {
            domain: domain.identifier.clone(),
            parent_id: parent_id.to_string(),
            name: name.to_string(),
            existing_id: existing.id,
        });
    }
    Ok(parent)
}

fn bump_parent_size(txn: &mut Transaction<'_>, mut parent: Item, delta: i64) {
    parent.size = (parent.size + delta).max(0);
    parent.modified_at = now_seconds();
    txn.put(parent);
}
