//! Application of a remote change batch to one directory.
//!
//! Runs entirely inside a store transaction. Remote items are matched to
//! local rows by `(parent, name)` first: a same-named sibling carrying a
//! different id has its identity absorbed by the remote item and its old
//! id reported as erased. Two unrelated items that race to the same name
//! before either is confirmed are merged; this is a known limitation of
//! name-based matching.

use storemirror_protocol::{DirectoryChanges, RemoteItem};
use storemirror_store::{
    DomainId, DownloadState, Item, Transaction, UploadState, DEFAULT_CONTENT_TYPE,
    DIRECTORY_CONTENT_TYPE, ROOT_ITEM_ID,
};
use tracing::{debug, warn};

/// What a batch changed.
#[derive(Debug, Default)]
pub(crate) struct AppliedBatch {
    /// Ids of rows inserted or updated, in batch order.
    pub(crate) updated_ids: Vec<String>,
    /// Erased ids, including superseded provisional ids.
    pub(crate) erased: Vec<String>,
    /// Provisional rows absorbed by a remote identity.
    pub(crate) reconciled: usize,
    /// Provisional ids whose staged content no transfer still needs.
    pub(crate) released_artifacts: Vec<String>,
}

/// Content type recorded for a remote item.
pub(crate) fn content_type_for(remote: &RemoteItem) -> String {
    if remote.is_directory() {
        DIRECTORY_CONTENT_TYPE.to_string()
    } else if remote.ctype.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        remote.ctype.to_ascii_lowercase()
    }
}

/// Overwrites a row's remote-owned fields.
pub(crate) fn apply_remote_fields(row: &mut Item, remote: &RemoteItem) {
    row.name = remote.name.clone();
    row.content_type = content_type_for(remote);
    row.size = remote.size;
    row.created_at = remote.cdate;
    row.modified_at = remote.mdate;
    row.upload_state = UploadState::Uploaded;
    row.upload_error = None;
}

/// Applies `changes` to `parent_id`.
///
/// Returns `None` without writing when the parent row is missing or the
/// batch does not advance past `since`. A batch fetched from an anchor older
/// than the stored one is still applied, so a lagging caller catches up; the
/// stored anchor never moves backwards.
pub(crate) fn apply_changes(
    txn: &mut Transaction<'_>,
    domain: DomainId,
    parent_id: &str,
    since: i64,
    changes: &DirectoryChanges,
) -> Option<AppliedBatch> {
    let parent = txn.get(domain, parent_id)?;
    if changes.anchor <= since {
        return None;
    }

    let mut batch = AppliedBatch::default();
    for remote in &changes.new {
        apply_new(txn, domain, &parent, remote, &mut batch);
    }

    for erased in changes.erased_identifiers() {
        if erased == ROOT_ITEM_ID {
            warn!(domain = %domain, "remote reported the root as erased; ignoring");
            continue;
        }
        let removed = txn.delete_subtree(domain, &erased);
        if removed.is_empty() {
            debug!(domain = %domain, item_id = %erased, "erased item already absent");
        }
        batch.updated_ids.retain(|id| !removed.contains(id));
        push_unique(&mut batch.erased, erased);
    }

    // the batch may have erased the directory itself
    if let Some(mut parent) = txn.get(domain, parent_id) {
        if changes.anchor >= parent.anchor {
            parent.size = changes.size;
        }
        parent.anchor = parent.anchor.max(changes.anchor);
        txn.put(parent);
    }

    Some(batch)
}

fn apply_new(
    txn: &mut Transaction<'_>,
    domain: DomainId,
    parent: &Item,
    remote: &RemoteItem,
    batch: &mut AppliedBatch,
) {
    let remote_id = remote.identifier();
    let holder = txn.get(domain, &remote_id);

    match txn.child_named(domain, &parent.id, &remote.name) {
        Some(mut row) if row.id == remote_id => {
            let content_changed = row.modified_at != remote.mdate;
            apply_remote_fields(&mut row, remote);
            if content_changed
                && !row.is_directory()
                && row.download_state == DownloadState::Downloaded
            {
                row.download_state = DownloadState::NotStarted;
            }
            txn.put(row);
        }
        Some(sibling) => absorb(txn, domain, parent, sibling, remote, batch),
        None => match holder {
            Some(mut row) => {
                // known elsewhere: the item moved or was renamed into this directory
                row.parent_id = parent.id.clone();
                apply_remote_fields(&mut row, remote);
                txn.put(row);
            }
            None => {
                let mut row = Item::child_of(parent, remote_id.clone(), "", "");
                apply_remote_fields(&mut row, remote);
                row.download_state = row.settled_download_state();
                txn.put(row);
            }
        },
    }

    push_unique(&mut batch.updated_ids, remote_id);
}

fn absorb(
    txn: &mut Transaction<'_>,
    domain: DomainId,
    parent: &Item,
    sibling: Item,
    remote: &RemoteItem,
    batch: &mut AppliedBatch,
) {
    let remote_id = remote.identifier();
    let old_id = sibling.id.clone();
    let was_provisional = sibling.is_provisional();
    let upload_in_flight = sibling.upload_state == UploadState::Uploading;

    for mut child in txn.children(domain, &old_id) {
        child.parent_id = remote_id.clone();
        txn.put(child);
    }
    txn.delete(domain, &old_id);

    let mut row = sibling;
    row.id = remote_id.clone();
    row.parent_id = parent.id.clone();
    apply_remote_fields(&mut row, remote);

    if was_provisional {
        row.origin_id = Some(old_id.clone());
        row.download_state = if upload_in_flight {
            DownloadState::PendingLocalDelete
        } else {
            batch.released_artifacts.push(old_id.clone());
            row.settled_download_state()
        };
        batch.reconciled += 1;
        debug!(
            domain = %domain,
            parent_id = %parent.id,
            item_id = %remote_id,
            provisional_id = %old_id,
            "absorbed provisional item"
        );
    } else {
        // a different remote object now holds the name
        row.origin_id = None;
        row.anchor = 0;
        row.download_state = row.settled_download_state();
        row.download_error = None;
        debug!(
            domain = %domain,
            parent_id = %parent.id,
            item_id = %remote_id,
            replaced_id = %old_id,
            "replaced item under the same name"
        );
    }

    txn.put(row);
    push_unique(&mut batch.erased, old_id);
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
