//! In-memory remote store for tests and local development.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStoreClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use storemirror_protocol::{DirectoryChanges, RemoteItem, REMOTE_FOLDER_TYPE};
use storemirror_store::{now_seconds, ROOT_ITEM_ID};

#[derive(Debug, Clone)]
enum LogEntry {
    New { anchor: i64, id: String },
    Erase { anchor: i64, id: i64 },
}

impl LogEntry {
    fn anchor(&self) -> i64 {
        match self {
            Self::New { anchor, .. } | Self::Erase { anchor, .. } => *anchor,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    info: RemoteItem,
    parent: String,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct Tree {
    next_id: i64,
    next_anchor: i64,
    nodes: HashMap<String, Node>,
    logs: HashMap<String, Vec<LogEntry>>,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self {
            next_id: 1,
            next_anchor: 1,
            ..Self::default()
        };
        tree.nodes.insert(
            ROOT_ITEM_ID.to_string(),
            Node {
                info: RemoteItem {
                    id: 0,
                    name: String::new(),
                    ctype: REMOTE_FOLDER_TYPE.to_string(),
                    size: 0,
                    mdate: 0,
                    cdate: 0,
                },
                parent: String::new(),
                content: Vec::new(),
            },
        );
        tree
    }

    fn children(&self, parent: &str) -> impl Iterator<Item = &Node> {
        let parent = parent.to_string();
        self.nodes.values().filter(move |n| n.parent == parent)
    }

    fn log(&mut self, directory: &str, make: impl FnOnce(i64) -> LogEntry) {
        let anchor = self.next_anchor;
        self.next_anchor += 1;
        self.logs
            .entry(directory.to_string())
            .or_default()
            .push(make(anchor));
    }

    fn insert(
        &mut self,
        parent: &str,
        name: &str,
        ctype: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteItem> {
        match self.nodes.get(parent) {
            None => {
                return Err(SyncError::rejected(
                    404,
                    format!("no such directory {parent}"),
                ))
            }
            Some(node) if !node.info.ctype.eq_ignore_ascii_case(REMOTE_FOLDER_TYPE) => {
                return Err(SyncError::rejected(400, format!("{parent} is not a directory")))
            }
            Some(_) => {}
        }
        if self.children(parent).any(|n| n.info.name == name) {
            return Err(SyncError::rejected(409, format!("{name:?} already exists")));
        }

        let id = self.next_id;
        self.next_id += 1;
        let now = now_seconds();
        let is_folder = ctype.eq_ignore_ascii_case(REMOTE_FOLDER_TYPE);
        let info = RemoteItem {
            id,
            name: name.to_string(),
            ctype: ctype.to_string(),
            size: if is_folder { 0 } else { content.len() as i64 },
            mdate: now,
            cdate: now,
        };
        let key = info.identifier();
        self.nodes.insert(
            key.clone(),
            Node {
                info: info.clone(),
                parent: parent.to_string(),
                content,
            },
        );
        self.log(parent, |anchor| LogEntry::New { anchor, id: key });
        Ok(info)
    }

    fn erase(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let parent = node.parent.clone();
        let numeric = node.info.id;

        let mut pending = vec![id.to_string()];
        while let Some(next) = pending.pop() {
            pending.extend(self.children(&next).map(|n| n.info.identifier()));
            self.nodes.remove(&next);
        }
        self.log(&parent, |anchor| LogEntry::Erase { anchor, id: numeric });
        true
    }
}

/// An in-memory remote store.
///
/// Every mutation appends to the parent directory's change log with a
/// fresh, globally increasing anchor, so `list_changes` behaves like a
/// real change feed. Failures can be injected per call family.
///
/// # Example
///
/// ```rust
/// use storemirror_sync_engine::{MockRemote, RemoteStoreClient};
///
/// let remote = MockRemote::new();
/// let docs = remote.add_directory("root", "docs").unwrap();
/// remote.add_file(&docs.identifier(), "a.txt", b"hello").unwrap();
///
/// let changes = remote.list_changes("root", 0, 10).unwrap();
/// assert_eq!(changes.new.len(), 1);
/// assert_eq!(changes.remain, 0);
/// ```
#[derive(Debug)]
pub struct MockRemote {
    tree: Mutex<Tree>,
    connected: AtomicBool,
    fail_transfers: AtomicUsize,
    list_calls: AtomicUsize,
    scripted_changes: Mutex<VecDeque<DirectoryChanges>>,
    download_dir: PathBuf,
}

impl MockRemote {
    /// Creates an empty store containing only the root directory.
    pub fn new() -> Self {
        Self::with_download_dir(std::env::temp_dir().join("storemirror-mock-downloads"))
    }

    /// Creates an empty store that writes downloads into `dir`.
    pub fn with_download_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            tree: Mutex::new(Tree::new()),
            connected: AtomicBool::new(true),
            fail_transfers: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            scripted_changes: Mutex::new(VecDeque::new()),
            download_dir: dir.into(),
        }
    }

    /// Sets the connected state. While disconnected every call fails with
    /// a retryable transport error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `count` uploads or directory creations fail.
    pub fn fail_next_transfers(&self, count: usize) {
        self.fail_transfers.store(count, Ordering::SeqCst);
    }

    /// Queues a literal response for the next `list_changes` call,
    /// bypassing the change logs.
    pub fn push_changes(&self, changes: DirectoryChanges) {
        self.scripted_changes.lock().push_back(changes);
    }

    /// Number of `list_changes` calls served so far.
    pub fn list_changes_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Adds a directory as if another client created it.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the parent is missing or the name is taken.
    pub fn add_directory(&self, parent_id: &str, name: &str) -> SyncResult<RemoteItem> {
        self.tree
            .lock()
            .insert(parent_id, name, REMOTE_FOLDER_TYPE, Vec::new())
    }

    /// Adds a file as if another client uploaded it.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the parent is missing or the name is taken.
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> SyncResult<RemoteItem> {
        self.tree
            .lock()
            .insert(parent_id, name, "application/octet-stream", content.to_vec())
    }

    /// Removes an item and its subtree. Returns false if it was absent.
    pub fn erase(&self, id: &str) -> bool {
        self.tree.lock().erase(id)
    }

    /// Items currently under `parent_id`, by name.
    pub fn children(&self, parent_id: &str) -> Vec<RemoteItem> {
        let tree = self.tree.lock();
        let mut items: Vec<RemoteItem> = tree.children(parent_id).map(|n| n.info.clone()).collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Finds a child of `parent_id` by exact name.
    pub fn child_named(&self, parent_id: &str, name: &str) -> Option<RemoteItem> {
        let tree = self.tree.lock();
        let found = tree
            .children(parent_id)
            .find(|n| n.info.name == name)
            .map(|n| n.info.clone());
        found
    }

    /// Stored content of a file.
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.tree.lock().nodes.get(id).map(|n| n.content.clone())
    }

    /// Latest anchor recorded for a directory (0 when it has no changes).
    pub fn latest_anchor(&self, directory_id: &str) -> i64 {
        self.tree
            .lock()
            .logs
            .get(directory_id)
            .and_then(|log| log.last())
            .map_or(0, LogEntry::anchor)
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("remote unreachable"))
        }
    }

    fn take_injected_failure(&self) -> SyncResult<()> {
        let injected = self
            .fail_transfers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(SyncError::transport_retryable("injected transfer failure"))
        } else {
            Ok(())
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStoreClient for MockRemote {
    fn get_item_info(&self, id: &str) -> SyncResult<RemoteItem> {
        self.ensure_connected()?;
        self.tree
            .lock()
            .nodes
            .get(id)
            .map(|n| n.info.clone())
            .ok_or_else(|| SyncError::rejected(404, format!("no such item {id}")))
    }

    fn list_changes(
        &self,
        directory_id: &str,
        since: i64,
        max_count: u32,
    ) -> SyncResult<DirectoryChanges> {
        self.ensure_connected()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.scripted_changes.lock().pop_front() {
            return Ok(scripted);
        }

        let tree = self.tree.lock();
        if !tree.nodes.contains_key(directory_id) {
            return Err(SyncError::rejected(404, format!("no such directory {directory_id}")));
        }

        let pending: Vec<&LogEntry> = tree
            .logs
            .get(directory_id)
            .map(|log| log.iter().filter(|e| e.anchor() > since).collect())
            .unwrap_or_default();
        let take = pending.len().min(max_count.max(1) as usize);
        let (batch, rest) = pending.split_at(take);

        let mut changes = DirectoryChanges {
            anchor: batch.last().map_or(since, |e| e.anchor()),
            remain: rest.len() as i64,
            size: tree.children(directory_id).count() as i64,
            ..DirectoryChanges::default()
        };
        for entry in batch {
            match entry {
                LogEntry::New { id, .. } => {
                    // superseded by a later erase when the node is gone
                    if let Some(node) = tree.nodes.get(id) {
                        if node.parent == directory_id {
                            changes.new.push(node.info.clone());
                        }
                    }
                }
                LogEntry::Erase { id, .. } => changes.erase.push(*id),
            }
        }
        Ok(changes)
    }

    fn create_directory(&self, parent_id: &str, name: &str) -> SyncResult<RemoteItem> {
        self.ensure_connected()?;
        self.take_injected_failure()?;
        self.add_directory(parent_id, name)
    }

    async fn upload(
        &self,
        local_path: &Path,
        parent_id: &str,
        name: &str,
    ) -> SyncResult<RemoteItem> {
        self.ensure_connected()?;
        self.take_injected_failure()?;
        let content = tokio::fs::read(local_path).await?;
        self.tree
            .lock()
            .insert(parent_id, name, "application/octet-stream", content)
    }

    async fn download(&self, id: &str) -> SyncResult<PathBuf> {
        self.ensure_connected()?;
        let content = {
            let tree = self.tree.lock();
            let node = tree
                .nodes
                .get(id)
                .ok_or_else(|| SyncError::rejected(404, format!("no such item {id}")))?;
            if node.info.ctype.eq_ignore_ascii_case(REMOTE_FOLDER_TYPE) {
                return Err(SyncError::rejected(400, format!("{id} is a directory")));
            }
            node.content.clone()
        };

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}
