//! The metadata store.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::domain::{DomainId, DomainRegistry, ROOT_ITEM_ID};
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::journal::record::{self, JournalRecord, RowWrite};
use crate::journal::{FileJournal, JournalBackend, MemoryJournal};
use crate::order::{sort_items, SortKey};
use crate::tables::Tables;
use crate::transaction::Transaction;
use crate::verify::{self, VerifyReport};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Durable store of mirrored item rows for every domain.
///
/// Rows live in memory and every committed transaction is appended to a
/// journal before it becomes visible. Opening a store replays the journal.
///
/// # Concurrency
///
/// Any number of readers may run concurrently. Write transactions are
/// serialized; a transaction's reads see the committed state plus its own
/// pending writes, and its writes become visible atomically.
///
/// # Example
///
/// ```rust
/// use storemirror_store::{DomainRegistry, MetadataStore, ROOT_ITEM_ID};
///
/// let store = MetadataStore::open_in_memory().unwrap();
/// let registry = DomainRegistry::standard();
/// store.bootstrap(&registry).unwrap();
///
/// let files = registry.get("files").unwrap();
/// let root = store.get(files.id, ROOT_ITEM_ID).unwrap().unwrap();
/// assert_eq!(root.name, "Files");
/// ```
pub struct MetadataStore {
    config: StoreConfig,
    /// Holds the directory lock. None for in-memory stores.
    dir: Option<StoreDir>,
    journal: Mutex<Box<dyn JournalBackend>>,
    tables: RwLock<Tables>,
    /// Serializes write transactions.
    write_lock: Mutex<()>,
    /// Last committed sequence number.
    sequence: AtomicU64,
    /// Records in the journal since the last compaction.
    journal_records: AtomicU64,
    is_open: RwLock<bool>,
}

impl MetadataStore {
    /// Opens a store directory with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the store locked (`Locked`)
    /// - The journal cannot be replayed (`JournalCorrupted`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store directory with custom configuration.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let journal = FileJournal::open(&dir.journal_path())?;
        info!(path = %path.display(), "opening metadata store");
        Self::build(config, Box::new(journal), Some(dir))
    }

    /// Opens a store over an arbitrary journal backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or replayed.
    pub fn open_with_journal(
        journal: Box<dyn JournalBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Self::build(config, journal, None)
    }

    /// Opens an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with_journal(Box::new(MemoryJournal::new()), StoreConfig::default())
    }

    fn build(
        config: StoreConfig,
        journal: Box<dyn JournalBackend>,
        dir: Option<StoreDir>,
    ) -> StoreResult<Self> {
        let bytes = journal.read_all()?;
        let replay = record::decode_frames(&bytes)?;

        let mut tables = Tables::default();
        let mut sequence = 0;
        let record_count = replay.records.len() as u64;
        for record in replay.records {
            sequence = sequence.max(record.sequence());
            match record {
                JournalRecord::Commit { writes, .. } => {
                    for write in writes {
                        tables.apply(write);
                    }
                }
                JournalRecord::Snapshot { rows, .. } => {
                    tables = Tables::default();
                    for row in rows {
                        tables.put(row);
                    }
                }
            }
        }

        debug!(
            records = record_count,
            rows = tables.len(),
            sequence,
            "replayed journal"
        );

        let store = Self {
            config,
            dir,
            journal: Mutex::new(journal),
            tables: RwLock::new(tables),
            write_lock: Mutex::new(()),
            sequence: AtomicU64::new(sequence),
            journal_records: AtomicU64::new(record_count),
            is_open: RwLock::new(true),
        };

        if replay.torn_tail {
            warn!("journal ends in a partial record; compacting");
            store.compact()?;
        } else if store.compaction_due() {
            store.compact()?;
        }

        Ok(store)
    }

    /// Runs `f` in a write transaction.
    ///
    /// If `f` returns `Ok`, its writes are validated and committed as one
    /// journal record. If it returns `Err`, nothing is written. Commit fails
    /// with `DuplicateItem` when two rows would share a parent and name.
    ///
    /// Only one write transaction runs at a time. Inside `f`, read through
    /// the transaction rather than the store.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.ensure_open()?;
        let _writer = self.write_lock.lock();

        let (value, writes) = {
            let tables = self.tables.read();
            let mut txn = Transaction::new(&tables);
            let value = f(&mut txn)?;
            txn.validate()?;
            (value, txn.into_writes())
        };

        if !writes.is_empty() {
            self.commit(writes)?;
        }
        Ok(value)
    }

    // Caller holds `write_lock`.
    fn commit(&self, writes: Vec<RowWrite>) -> StoreResult<u64> {
        let sequence = self.sequence.load(Ordering::SeqCst) + 1;
        let write_count = writes.len();
        let record = JournalRecord::Commit {
            sequence,
            writes: writes.clone(),
        };
        let frame = record::encode_frame(&record)?;

        {
            let mut journal = self.journal.lock();
            journal.append(&frame)?;
            if self.config.sync_on_commit {
                journal.sync()?;
            }
        }

        {
            let mut tables = self.tables.write();
            for write in writes {
                tables.apply(write);
            }
        }

        self.sequence.store(sequence, Ordering::SeqCst);
        self.journal_records.fetch_add(1, Ordering::SeqCst);
        debug!(sequence, writes = write_count, "committed transaction");

        if self.compaction_due() {
            self.compact_locked()?;
        }
        Ok(sequence)
    }

    fn compaction_due(&self) -> bool {
        self.config.compact_after > 0
            && self.journal_records.load(Ordering::SeqCst) > self.config.compact_after
    }

    /// Rewrites the journal as a single snapshot of the current rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The previous
    /// journal stays intact in that case.
    pub fn compact(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let _writer = self.write_lock.lock();
        self.compact_locked()
    }

    // Caller holds `write_lock`.
    fn compact_locked(&self) -> StoreResult<()> {
        let mut rows: Vec<Item> = self.tables.read().rows().cloned().collect();
        rows.sort_by(|a, b| (a.domain, &a.id).cmp(&(b.domain, &b.id)));
        let row_count = rows.len();

        let sequence = self.sequence.load(Ordering::SeqCst);
        let frame = record::encode_frame(&JournalRecord::Snapshot { sequence, rows })?;
        self.journal.lock().replace(&frame)?;
        self.journal_records.store(1, Ordering::SeqCst);

        info!(rows = row_count, sequence, "compacted journal");
        Ok(())
    }

    /// Inserts a root row for every registered domain that lacks one.
    ///
    /// Returns the number of roots created. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn bootstrap(&self, registry: &DomainRegistry) -> StoreResult<usize> {
        let created = self.transaction(|txn| {
            let mut created = 0;
            for domain in registry {
                if txn.get(domain.id, ROOT_ITEM_ID).is_none() {
                    txn.put(Item::root(domain));
                    created += 1;
                }
            }
            Ok::<_, StoreError>(created)
        })?;

        if created > 0 {
            info!(created, "bootstrapped domain roots");
        }
        Ok(created)
    }

    /// Reads a row.
    pub fn get(&self, domain: DomainId, id: &str) -> StoreResult<Option<Item>> {
        self.ensure_open()?;
        Ok(self.tables.read().get(domain, id).cloned())
    }

    /// Finds the child of `parent_id` with exactly this name.
    pub fn child_named(
        &self,
        domain: DomainId,
        parent_id: &str,
        name: &str,
    ) -> StoreResult<Option<Item>> {
        self.ensure_open()?;
        Ok(self
            .tables
            .read()
            .child_named(domain, parent_id, name)
            .cloned())
    }

    /// Finds a child of `parent_id` whose name matches ignoring case.
    pub fn child_named_ignore_case(
        &self,
        domain: DomainId,
        parent_id: &str,
        name: &str,
    ) -> StoreResult<Option<Item>> {
        self.ensure_open()?;
        let folded = name.to_lowercase();
        Ok(self
            .tables
            .read()
            .children(domain, parent_id)
            .find(|item| item.name.to_lowercase() == folded)
            .cloned())
    }

    /// Finds the row that absorbed the provisional id `origin_id`.
    pub fn find_by_origin(&self, domain: DomainId, origin_id: &str) -> StoreResult<Option<Item>> {
        self.ensure_open()?;
        Ok(self.tables.read().find_by_origin(domain, origin_id).cloned())
    }

    /// Reads a row by id, falling back to the row that absorbed it.
    pub fn get_or_absorbed(&self, domain: DomainId, id: &str) -> StoreResult<Option<Item>> {
        self.ensure_open()?;
        let tables = self.tables.read();
        Ok(tables
            .get(domain, id)
            .or_else(|| tables.find_by_origin(domain, id))
            .cloned())
    }

    /// All children of `parent_id` in natural name order.
    pub fn children(&self, domain: DomainId, parent_id: &str) -> StoreResult<Vec<Item>> {
        self.children_page(domain, parent_id, SortKey::ByName, 0, usize::MAX)
    }

    /// One ordered page of the children of `parent_id`.
    ///
    /// An offset past the end yields an empty page.
    pub fn children_page(
        &self,
        domain: DomainId,
        parent_id: &str,
        sort: SortKey,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Item>> {
        self.ensure_open()?;
        let mut items: Vec<Item> = self
            .tables
            .read()
            .children(domain, parent_id)
            .cloned()
            .collect();
        sort_items(&mut items, sort);
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    /// The stored anchor of a directory, if the row exists.
    pub fn anchor_of(&self, domain: DomainId, id: &str) -> StoreResult<Option<i64>> {
        self.ensure_open()?;
        Ok(self.tables.read().get(domain, id).map(|item| item.anchor))
    }

    /// Total number of rows across all domains.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Last committed sequence number.
    #[must_use]
    pub fn committed_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Checks structural invariants of the stored tree.
    pub fn verify(&self, registry: &DomainRegistry) -> StoreResult<VerifyReport> {
        self.ensure_open()?;
        Ok(verify::verify_tables(&self.tables.read(), registry))
    }

    /// Flushes the journal and closes the store.
    ///
    /// Later operations fail with `Closed`. Closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        let _writer = self.write_lock.lock();
        self.journal.lock().sync()?;
        *is_open = false;

        if let Some(dir) = &self.dir {
            debug!(path = %dir.path().display(), "closed metadata store");
        }
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("is_open", &self.is_open())
            .field("item_count", &self.item_count())
            .field("committed_sequence", &self.committed_sequence())
            .finish_non_exhaustive()
    }
}

impl Drop for MetadataStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
