//! Structural checks over the stored tree.

use crate::domain::{DomainRegistry, ROOT_ITEM_ID};
use crate::tables::Tables;
use std::collections::HashSet;

/// Outcome of [`MetadataStore::verify`](crate::MetadataStore::verify).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Domains whose trees were walked.
    pub domains_checked: usize,
    /// Rows inspected.
    pub rows_checked: usize,
    /// One line per violation found.
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// True when no problems were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

pub(crate) fn verify_tables(tables: &Tables, registry: &DomainRegistry) -> VerifyReport {
    let mut report = VerifyReport {
        domains_checked: registry.len(),
        ..VerifyReport::default()
    };

    for domain in registry {
        match tables.get(domain.id, ROOT_ITEM_ID) {
            None => report
                .problems
                .push(format!("domain {} has no root row", domain.identifier)),
            Some(root) if !root.is_root() || !root.is_directory() => report.problems.push(format!(
                "root of domain {} is not a parentless directory",
                domain.identifier
            )),
            Some(_) => {}
        }
    }

    let row_limit = tables.len();
    let mut sibling_names = HashSet::new();
    for item in tables.rows() {
        report.rows_checked += 1;

        if registry.by_id(item.domain).is_none() {
            report
                .problems
                .push(format!("row {} belongs to unregistered domain {}", item.id, item.domain));
            continue;
        }
        if item.is_root() {
            if item.id != ROOT_ITEM_ID {
                report
                    .problems
                    .push(format!("row {} has no parent but is not a root", item.id));
            }
            continue;
        }

        match tables.get(item.domain, &item.parent_id) {
            None => report.problems.push(format!(
                "row {} references missing parent {}",
                item.id, item.parent_id
            )),
            Some(parent) if !parent.is_directory() => report.problems.push(format!(
                "row {} has non-directory parent {}",
                item.id, item.parent_id
            )),
            Some(_) => {}
        }

        if !sibling_names.insert((item.domain, item.parent_id.as_str(), item.name.as_str())) {
            report.problems.push(format!(
                "name {:?} is used twice under {}",
                item.name, item.parent_id
            ));
        }

        // every chain must end at a root within row_limit steps
        let mut cursor = item.parent_id.as_str();
        let mut steps = 0;
        while let Some(parent) = tables.get(item.domain, cursor) {
            if parent.is_root() {
                break;
            }
            steps += 1;
            if steps > row_limit {
                report
                    .problems
                    .push(format!("row {} sits on a parent cycle", item.id));
                break;
            }
            cursor = parent.parent_id.as_str();
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, DIRECTORY_CONTENT_TYPE};

    fn tables_with_roots(registry: &DomainRegistry) -> Tables {
        let mut tables = Tables::default();
        for domain in registry {
            tables.put(Item::root(domain));
        }
        tables
    }

    #[test]
    fn healthy_tree_passes() {
        let registry = DomainRegistry::standard();
        let mut tables = tables_with_roots(&registry);
        let root = tables.get(registry.get("files").unwrap().id, ROOT_ITEM_ID).unwrap().clone();
        let dir = Item::child_of(&root, "1", "docs", DIRECTORY_CONTENT_TYPE);
        tables.put(Item::child_of(&dir, "2", "a.txt", "text/plain"));
        tables.put(dir);

        let report = verify_tables(&tables, &registry);
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.rows_checked, 4);
    }

    #[test]
    fn orphan_and_missing_root_reported() {
        let registry = DomainRegistry::standard();
        let mut tables = Tables::default();
        let files_root = Item::root(registry.get("files").unwrap());
        tables.put(files_root.clone());
        let mut orphan = Item::child_of(&files_root, "9", "lost", "text/plain");
        orphan.parent_id = "nowhere".into();
        tables.put(orphan);

        let report = verify_tables(&tables, &registry);
        assert_eq!(report.problems.len(), 2);
    }

    #[test]
    fn cycle_reported() {
        let registry = DomainRegistry::standard();
        let mut tables = tables_with_roots(&registry);
        let root = tables.get(registry.get("files").unwrap().id, ROOT_ITEM_ID).unwrap().clone();
        let mut a = Item::child_of(&root, "a", "a", DIRECTORY_CONTENT_TYPE);
        let mut b = Item::child_of(&root, "b", "b", DIRECTORY_CONTENT_TYPE);
        a.parent_id = "b".into();
        b.parent_id = "a".into();
        tables.put(a);
        tables.put(b);

        let report = verify_tables(&tables, &registry);
        assert!(report.problems.iter().any(|p| p.contains("cycle")));
    }

    #[test]
    fn duplicate_sibling_names_reported() {
        let registry = DomainRegistry::standard();
        let mut tables = tables_with_roots(&registry);
        let root = tables.get(registry.get("files").unwrap().id, ROOT_ITEM_ID).unwrap().clone();
        tables.put(Item::child_of(&root, "1", "same", "text/plain"));
        tables.put(Item::child_of(&root, "2", "same", "text/plain"));

        let report = verify_tables(&tables, &registry);
        assert_eq!(report.problems.len(), 1);
        assert!(report.problems[0].contains("used twice"));
    }
}
