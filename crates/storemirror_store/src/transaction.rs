//! Write transactions.
//!
//! A [`Transaction`] buffers row writes over a read view of the committed
//! tables. Reads through the transaction see its own pending writes. The
//! buffered set is validated and journaled as one record at commit; if the
//! closure fails nothing is written.

use crate::domain::DomainId;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::journal::record::RowWrite;
use crate::tables::{row_key, RowKey, Tables};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone)]
enum PendingWrite {
    Put(Item),
    Delete,
}

/// A pending write transaction.
///
/// Obtained through [`MetadataStore::transaction`](crate::MetadataStore::transaction).
#[derive(Debug)]
pub struct Transaction<'a> {
    tables: &'a Tables,
    writes: BTreeMap<RowKey, PendingWrite>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(tables: &'a Tables) -> Self {
        Self {
            tables,
            writes: BTreeMap::new(),
        }
    }

    /// Reads a row.
    #[must_use]
    pub fn get(&self, domain: DomainId, id: &str) -> Option<Item> {
        match self.writes.get(&row_key(domain, id)) {
            Some(PendingWrite::Put(item)) => Some(item.clone()),
            Some(PendingWrite::Delete) => None,
            None => self.tables.get(domain, id).cloned(),
        }
    }

    /// Finds the child of `parent_id` with exactly this name.
    #[must_use]
    pub fn child_named(&self, domain: DomainId, parent_id: &str, name: &str) -> Option<Item> {
        if let Some(item) = self
            .pending_puts()
            .find(|i| i.domain == domain && i.parent_id == parent_id && i.name == name)
        {
            return Some(item.clone());
        }
        self.tables
            .child_named(domain, parent_id, name)
            .filter(|item| !self.is_overridden(item))
            .cloned()
    }

    /// Finds a child of `parent_id` whose name matches ignoring case.
    #[must_use]
    pub fn child_named_ignore_case(
        &self,
        domain: DomainId,
        parent_id: &str,
        name: &str,
    ) -> Option<Item> {
        let folded = name.to_lowercase();
        self.children(domain, parent_id)
            .into_iter()
            .find(|item| item.name.to_lowercase() == folded)
    }

    /// All children of `parent_id`, in no particular order.
    #[must_use]
    pub fn children(&self, domain: DomainId, parent_id: &str) -> Vec<Item> {
        let mut out: Vec<Item> = self
            .tables
            .children(domain, parent_id)
            .filter(|item| !self.is_overridden(item))
            .cloned()
            .collect();
        out.extend(
            self.pending_puts()
                .filter(|i| i.domain == domain && i.parent_id == parent_id)
                .cloned(),
        );
        out
    }

    /// Finds the row that absorbed the provisional id `origin_id`.
    #[must_use]
    pub fn find_by_origin(&self, domain: DomainId, origin_id: &str) -> Option<Item> {
        if let Some(item) = self
            .pending_puts()
            .find(|i| i.domain == domain && i.origin_id.as_deref() == Some(origin_id))
        {
            return Some(item.clone());
        }
        self.tables
            .find_by_origin(domain, origin_id)
            .filter(|item| !self.is_overridden(item))
            .cloned()
    }

    /// Every row, in any domain, for which `keep` returns true.
    #[must_use]
    pub fn rows_where(&self, mut keep: impl FnMut(&Item) -> bool) -> Vec<Item> {
        let mut out: Vec<Item> = self
            .tables
            .rows()
            .filter(|item| !self.is_overridden(item) && keep(item))
            .cloned()
            .collect();
        out.extend(self.pending_puts().filter(|item| keep(item)).cloned());
        out
    }

    /// Inserts or replaces a row.
    pub fn put(&mut self, item: Item) {
        let key = row_key(item.domain, &item.id);
        self.writes.insert(key, PendingWrite::Put(item));
    }

    /// Deletes a row. Returns whether it existed.
    pub fn delete(&mut self, domain: DomainId, id: &str) -> bool {
        let existed = self.get(domain, id).is_some();
        self.writes.insert(row_key(domain, id), PendingWrite::Delete);
        existed
    }

    /// Deletes a row and everything beneath it. Returns the deleted ids,
    /// the given row first.
    pub fn delete_subtree(&mut self, domain: DomainId, id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            if self.get(domain, &next).is_none() {
                continue;
            }
            queue.extend(self.children(domain, &next).into_iter().map(|c| c.id));
            self.delete(domain, &next);
            removed.push(next);
        }
        removed
    }

    /// Number of buffered row writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn pending_puts(&self) -> impl Iterator<Item = &Item> {
        self.writes.values().filter_map(|w| match w {
            PendingWrite::Put(item) => Some(item),
            PendingWrite::Delete => None,
        })
    }

    fn is_overridden(&self, item: &Item) -> bool {
        self.writes.contains_key(&row_key(item.domain, &item.id))
    }

    /// Checks that no two rows would share a parent and name.
    pub(crate) fn validate(&self) -> StoreResult<()> {
        let mut claimed: HashMap<(DomainId, &str, &str), &str> = HashMap::new();
        for item in self.pending_puts() {
            let slot = (item.domain, item.parent_id.as_str(), item.name.as_str());
            if claimed.insert(slot, item.id.as_str()).is_some() {
                return Err(duplicate(item));
            }
            let committed = self
                .tables
                .child_named(item.domain, &item.parent_id, &item.name);
            if let Some(committed) = committed {
                if committed.id != item.id && !self.is_overridden(committed) {
                    return Err(duplicate(item));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn into_writes(self) -> Vec<RowWrite> {
        self.writes
            .into_iter()
            .map(|((domain, id), write)| match write {
                PendingWrite::Put(item) => RowWrite::Put(item),
                PendingWrite::Delete => RowWrite::Delete { domain, id },
            })
            .collect()
    }
}

fn duplicate(item: &Item) -> StoreError {
    StoreError::DuplicateItem {
        domain: item.domain,
        parent_id: item.parent_id.clone(),
        name: item.name.clone(),
    }
}
