//! In-memory row table and secondary indexes.

use crate::domain::DomainId;
use crate::item::Item;
use crate::journal::record::RowWrite;
use std::collections::{BTreeMap, HashMap};

/// `(domain, id)` row key.
pub(crate) type RowKey = (DomainId, String);

pub(crate) fn row_key(domain: DomainId, id: &str) -> RowKey {
    (domain, id.to_string())
}

/// Committed rows plus indexes kept in step with them.
///
/// - `children`: `(domain, parent_id)` to `name -> id`
/// - `origins`: `(domain, origin_id)` to current id
#[derive(Debug, Default)]
pub(crate) struct Tables {
    rows: HashMap<RowKey, Item>,
    children: HashMap<RowKey, BTreeMap<String, String>>,
    origins: HashMap<RowKey, String>,
}

impl Tables {
    pub(crate) fn get(&self, domain: DomainId, id: &str) -> Option<&Item> {
        self.rows.get(&row_key(domain, id))
    }

    pub(crate) fn child_named(
        &self,
        domain: DomainId,
        parent_id: &str,
        name: &str,
    ) -> Option<&Item> {
        let id = self.children.get(&row_key(domain, parent_id))?.get(name)?;
        self.get(domain, id)
    }

    pub(crate) fn children<'a>(
        &'a self,
        domain: DomainId,
        parent_id: &str,
    ) -> impl Iterator<Item = &'a Item> + 'a {
        self.children
            .get(&row_key(domain, parent_id))
            .into_iter()
            .flat_map(|names| names.values())
            .filter_map(move |id| self.get(domain, id))
    }

    pub(crate) fn find_by_origin(&self, domain: DomainId, origin_id: &str) -> Option<&Item> {
        let id = self.origins.get(&row_key(domain, origin_id))?;
        self.get(domain, id)
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Item> {
        self.rows.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn apply(&mut self, write: RowWrite) {
        match write {
            RowWrite::Put(item) => self.put(item),
            RowWrite::Delete { domain, id } => {
                self.delete(domain, &id);
            }
        }
    }

    pub(crate) fn put(&mut self, item: Item) {
        let key = row_key(item.domain, &item.id);
        if let Some(old) = self.rows.remove(&key) {
            self.unindex(&old);
        }
        self.index(&item);
        self.rows.insert(key, item);
    }

    pub(crate) fn delete(&mut self, domain: DomainId, id: &str) -> Option<Item> {
        let old = self.rows.remove(&row_key(domain, id))?;
        self.unindex(&old);
        Some(old)
    }

    fn index(&mut self, item: &Item) {
        self.children
            .entry(row_key(item.domain, &item.parent_id))
            .or_default()
            .insert(item.name.clone(), item.id.clone());
        if let Some(origin) = &item.origin_id {
            self.origins
                .insert(row_key(item.domain, origin), item.id.clone());
        }
    }

    // Index entries are only removed while they still point at this row;
    // another row may have claimed the slot earlier in the same batch.
    fn unindex(&mut self, item: &Item) {
        let parent_key = row_key(item.domain, &item.parent_id);
        if let Some(names) = self.children.get_mut(&parent_key) {
            if names.get(&item.name) == Some(&item.id) {
                names.remove(&item.name);
            }
            if names.is_empty() {
                self.children.remove(&parent_key);
            }
        }
        if let Some(origin) = &item.origin_id {
            let origin_key = row_key(item.domain, origin);
            if self.origins.get(&origin_key) == Some(&item.id) {
                self.origins.remove(&origin_key);
            }
        }
    }
}
