//! Domain registry.
//!
//! A domain is an independent namespace of items backed by one remote
//! storage location. Every domain owns a single root item whose identifier
//! is [`ROOT_ITEM_ID`]; all other items descend from it.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Well-known identifier of every domain's root container.
pub const ROOT_ITEM_ID: &str = "root";

/// Numeric domain identifier used as part of every row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(u16);

impl DomainId {
    /// Creates a domain id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Numeric id.
    pub id: DomainId,
    /// Stable string identifier, used in task ids and host callbacks.
    pub identifier: String,
    /// Name shown to users; also the name of the root item.
    pub display_name: String,
    /// Remote storage path the domain mirrors.
    pub storage_path: String,
}

impl Domain {
    /// Creates a domain description.
    pub fn new(
        id: u16,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        storage_path: impl Into<String>,
    ) -> Self {
        Self {
            id: DomainId::new(id),
            identifier: identifier.into(),
            display_name: display_name.into(),
            storage_path: storage_path.into(),
        }
    }
}

/// Immutable set of domains known to the process.
///
/// # Example
///
/// ```rust
/// use storemirror_store::DomainRegistry;
///
/// let registry = DomainRegistry::standard();
/// let files = registry.get("files").unwrap();
/// assert_eq!(files.display_name, "Files");
/// ```
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    domains: Vec<Domain>,
}

impl DomainRegistry {
    /// Builds a registry from a list of domains.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list is empty, if an identifier is
    /// empty or contains `/`, or if ids or identifiers repeat.
    pub fn new(mut domains: Vec<Domain>) -> StoreResult<Self> {
        if domains.is_empty() {
            return Err(StoreError::invalid_operation(
                "domain registry needs at least one domain",
            ));
        }

        let mut ids = HashSet::new();
        let mut identifiers = HashSet::new();
        for domain in &domains {
            if domain.identifier.is_empty() || domain.identifier.contains('/') {
                return Err(StoreError::invalid_operation(format!(
                    "invalid domain identifier {:?}",
                    domain.identifier
                )));
            }
            if !ids.insert(domain.id) || !identifiers.insert(domain.identifier.as_str()) {
                return Err(StoreError::invalid_operation(format!(
                    "domain {} ({}) registered twice",
                    domain.identifier, domain.id
                )));
            }
        }

        domains.sort_by_key(|d| d.id);
        Ok(Self { domains })
    }

    /// The two built-in domains: `files` and `photos`.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            domains: vec![
                Domain::new(1, "files", "Files", "/files"),
                Domain::new(2, "photos", "Photos", "/photos"),
            ],
        }
    }

    /// Looks up a domain by its string identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.identifier == identifier)
    }

    /// Looks up a domain by its numeric id.
    #[must_use]
    pub fn by_id(&self, id: DomainId) -> Option<&Domain> {
        self.domains.iter().find(|d| d.id == id)
    }

    /// Like [`get`](Self::get) but fails with `UnknownDomain`.
    pub fn resolve(&self, identifier: &str) -> StoreResult<&Domain> {
        self.get(identifier)
            .ok_or_else(|| StoreError::unknown_domain(identifier))
    }

    /// Iterates over all domains in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Domain> {
        self.domains.iter()
    }

    /// Number of registered domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Always false for a constructed registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl<'a> IntoIterator for &'a DomainRegistry {
    type Item = &'a Domain;
    type IntoIter = std::slice::Iter<'a, Domain>;

    fn into_iter(self) -> Self::IntoIter {
        self.domains.iter()
    }
}
