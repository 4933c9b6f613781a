//! The sync engine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::host::FilesystemHost;
use crate::reconcile::{self, apply_remote_fields};
use crate::remote::RemoteStoreClient;
use crate::token::{AnchorToken, PageToken};
use crate::transfer::{TransferJobs, TransferQueue};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use storemirror_protocol::TaskId;
use storemirror_store::{Domain, DomainRegistry, Item, MetadataStore, StoreResult};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// One page of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Children in the requested order.
    pub items: Vec<Item>,
    /// Token for the following page; `None` once the listing is complete.
    pub next_token: Option<Vec<u8>>,
}

impl ListPage {
    /// Whether this is the last page.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_token.is_none()
    }
}

/// Result of one change enumeration.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Rows inserted or updated, re-read after commit.
    pub updated: Vec<Item>,
    /// Ids removed, including provisional ids absorbed by remote items.
    pub erased: Vec<String>,
    /// Anchor token to pass on the next call.
    pub next_anchor_token: Vec<u8>,
    /// Whether the remote has more changes past this batch.
    pub more_remaining: bool,
}

impl ChangeSet {
    fn unchanged(since: i64) -> SyncResult<Self> {
        Ok(Self {
            next_anchor_token: AnchorToken::new(since).encode()?,
            ..Self::default()
        })
    }

    /// Whether the enumeration changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.erased.is_empty()
    }

    /// The anchor carried by `next_anchor_token`.
    #[must_use]
    pub fn next_anchor(&self) -> i64 {
        AnchorToken::decode_or_zero(Some(&self.next_anchor_token)).anchor
    }
}

/// Counters describing engine activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Change batches applied.
    pub batches_applied: u64,
    /// Rows inserted or updated by change batches.
    pub items_applied: u64,
    /// Ids reported erased by change batches.
    pub items_erased: u64,
    /// Provisional rows absorbed by remote items.
    pub items_reconciled: u64,
    /// Successful uploads and directory creations.
    pub uploads_completed: u64,
    /// Failed uploads and directory creations.
    pub uploads_failed: u64,
    /// Successful downloads.
    pub downloads_completed: u64,
    /// Failed downloads.
    pub downloads_failed: u64,
    /// Last error observed.
    pub last_error: Option<String>,
    /// When the last change batch was applied.
    pub last_sync_time: Option<Instant>,
}

/// Mirrors remote domains into a [`MetadataStore`].
///
/// The engine is the only writer of the store. Host-facing calls are
/// synchronous; uploads and downloads are queued as
/// [`TransferJob`](crate::TransferJob)s and driven by
/// [`run_transfers`](Self::run_transfers) or
/// [`process_next_transfer`](Self::process_next_transfer).
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MetadataStore::open(Path::new("mirror"))?);
/// let (engine, jobs) = SyncEngine::new(
///     SyncConfig::new("state"),
///     DomainRegistry::standard(),
///     store,
///     client,
///     host,
/// )?;
/// let engine = Arc::new(engine);
/// tokio::spawn(Arc::clone(&engine).run_transfers(jobs));
///
/// let page = engine.list_page(ROOT_ITEM_ID, "files", None)?;
/// ```
pub struct SyncEngine<R: RemoteStoreClient, H: FilesystemHost> {
    pub(crate) config: SyncConfig,
    pub(crate) registry: DomainRegistry,
    pub(crate) store: Arc<MetadataStore>,
    pub(crate) remote: Arc<R>,
    pub(crate) host: Arc<H>,
    pub(crate) queue: TransferQueue,
    pub(crate) running: Mutex<HashMap<TaskId, AbortHandle>>,
    pub(crate) stats: RwLock<SyncStats>,
}

impl<R: RemoteStoreClient, H: FilesystemHost> SyncEngine<R, H> {
    /// Creates an engine and bootstraps a root row for every domain.
    ///
    /// Transfers left running by an earlier process are marked failed so
    /// they can be retried. Returns the engine and the receiving end of its
    /// transfer queue.
    ///
    /// # Errors
    ///
    /// Returns a store error if bootstrapping or recovery fails.
    pub fn new(
        config: SyncConfig,
        registry: DomainRegistry,
        store: Arc<MetadataStore>,
        remote: R,
        host: H,
    ) -> SyncResult<(Self, TransferJobs)> {
        store.bootstrap(&registry)?;
        let (queue, jobs) = TransferQueue::new();
        info!(domains = registry.len(), "sync engine ready");

        let engine = Self {
            config,
            registry,
            store,
            remote: Arc::new(remote),
            host: Arc::new(host),
            queue,
            running: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        };
        engine.recover_interrupted()?;
        Ok((engine, jobs))
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the domain registry.
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// Returns the metadata store.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the filesystem host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Returns a snapshot of the activity counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub(crate) fn domain(&self, identifier: &str) -> SyncResult<Domain> {
        self.registry
            .get(identifier)
            .cloned()
            .ok_or_else(|| SyncError::UnknownDomain(identifier.to_string()))
    }

    pub(crate) fn record_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Lists one page of the children of `parent_id`.
    ///
    /// Reads only the local store. An absent or unreadable token starts
    /// from the first page in name order. A page shorter than the batch
    /// size is the last one.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomain` or a store error.
    pub fn list_page(
        &self,
        parent_id: &str,
        domain: &str,
        token: Option<&[u8]>,
    ) -> SyncResult<ListPage> {
        let domain = self.domain(domain)?;
        let page = PageToken::decode_or_initial(token, self.config.page_batch_size);

        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let items = self.store.children_page(
            domain.id,
            parent_id,
            page.sort_key,
            offset,
            page.batch_size as usize,
        )?;

        let next_token = if items.len() < page.batch_size as usize {
            None
        } else {
            Some(page.advance(items.len()).encode()?)
        };

        debug!(
            domain = %domain.identifier,
            parent_id,
            offset = page.offset,
            returned = items.len(),
            complete = next_token.is_none(),
            "listed page"
        );
        Ok(ListPage { items, next_token })
    }

    /// The stored anchor of `parent_id` as a token (anchor 0 if unknown).
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomain` or a store error.
    pub fn current_anchor(&self, parent_id: &str, domain: &str) -> SyncResult<Vec<u8>> {
        let domain = self.domain(domain)?;
        let anchor = self.store.anchor_of(domain.id, parent_id)?.unwrap_or(0);
        AnchorToken::new(anchor).encode()
    }

    /// Fetches and applies the next batch of remote changes to `parent_id`.
    ///
    /// Fails closed: if the remote call fails, or the reported anchor does
    /// not advance past the token's anchor, nothing is written and an empty
    /// set carrying the caller's anchor is returned. Otherwise the batch is
    /// applied in one transaction and the affected rows are re-read after
    /// commit. A token older than the directory's stored anchor replays the
    /// batches it missed; re-applying them is idempotent and the stored
    /// anchor only moves forward.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDomain` or a store error. Remote errors are logged
    /// and recorded in [`stats`](Self::stats), never returned.
    pub fn enumerate_changes(
        &self,
        parent_id: &str,
        domain: &str,
        anchor_token: Option<&[u8]>,
    ) -> SyncResult<ChangeSet> {
        let domain = self.domain(domain)?;
        let since = AnchorToken::decode_or_zero(anchor_token).anchor;

        let Some(stored) = self.store.anchor_of(domain.id, parent_id)? else {
            debug!(domain = %domain.identifier, parent_id, "enumerating unknown directory");
            return ChangeSet::unchanged(since);
        };

        let changes =
            match self
                .remote
                .list_changes(parent_id, since, self.config.change_batch_size)
            {
                Ok(changes) => changes,
                Err(err) => {
                    warn!(
                        domain = %domain.identifier,
                        parent_id,
                        anchor = since,
                        error = %err,
                        "listing changes failed"
                    );
                    self.record_error(&err);
                    return ChangeSet::unchanged(since);
                }
            };

        if changes.anchor <= since {
            debug!(
                domain = %domain.identifier,
                parent_id,
                anchor = since,
                stored,
                remote_anchor = changes.anchor,
                "no newer changes"
            );
            return ChangeSet::unchanged(since);
        }

        let applied = self.store.transaction(|txn| {
            Ok::<_, SyncError>(reconcile::apply_changes(
                txn, domain.id, parent_id, since, &changes,
            ))
        })?;
        let Some(applied) = applied else {
            return ChangeSet::unchanged(since);
        };

        for provisional_id in &applied.released_artifacts {
            crate::artifact::purge_artifact(&self.config.artifact_root, provisional_id);
        }

        let updated = applied
            .updated_ids
            .iter()
            .filter_map(|id| self.store.get(domain.id, id).transpose())
            .collect::<StoreResult<Vec<_>>>()?;

        {
            let mut stats = self.stats.write();
            stats.batches_applied += 1;
            stats.items_applied += updated.len() as u64;
            stats.items_erased += applied.erased.len() as u64;
            stats.items_reconciled += applied.reconciled as u64;
            stats.last_sync_time = Some(Instant::now());
        }

        info!(
            domain = %domain.identifier,
            parent_id,
            anchor = changes.anchor,
            updated = updated.len(),
            erased = applied.erased.len(),
            reconciled = applied.reconciled,
            more = changes.has_more(),
            "applied change batch"
        );

        Ok(ChangeSet {
            updated,
            erased: applied.erased,
            next_anchor_token: AnchorToken::new(changes.anchor).encode()?,
            more_remaining: changes.has_more(),
        })
    }

    /// Re-reads one item's metadata from the remote and updates its row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row is missing, `State` for roots and
    /// provisional rows, and remote errors as returned by the client.
    pub fn refresh_item(&self, id: &str, domain: &str) -> SyncResult<Item> {
        let domain = self.domain(domain)?;
        let current = self
            .store
            .get(domain.id, id)?
            .ok_or_else(|| SyncError::not_found(&domain.identifier, id))?;
        if current.is_root() {
            return Err(SyncError::state("the domain root has no remote metadata"));
        }
        if current.is_provisional() {
            return Err(SyncError::state(format!(
                "item {id} is not yet confirmed by the remote"
            )));
        }

        let remote = self.remote.get_item_info(id)?;

        let item = self.store.transaction(|txn| {
            let mut row = txn
                .get(domain.id, id)
                .ok_or_else(|| SyncError::not_found(&domain.identifier, id))?;
            apply_remote_fields(&mut row, &remote);
            txn.put(row.clone());
            Ok::<_, SyncError>(row)
        })?;

        debug!(domain = %domain.identifier, item_id = id, "refreshed item");
        Ok(item)
    }
}

impl<R: RemoteStoreClient, H: FilesystemHost> std::fmt::Debug for SyncEngine<R, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("domains", &self.registry.len())
            .field("running_transfers", &self.running.lock().len())
            .finish_non_exhaustive()
    }
}
