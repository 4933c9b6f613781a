//! In-memory journal for tests and ephemeral stores.

use super::JournalBackend;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal that lives in memory.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// store, and reopen a new store over the same bytes to exercise replay.
///
/// # Example
///
/// ```rust
/// use storemirror_store::{JournalBackend, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// let offset = journal.append(b"frame").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(journal.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal pre-filled with bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Copies the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let mut buf = self.data.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn replace(&mut self, data: &[u8]) -> StoreResult<()> {
        *self.data.write() = data.to_vec();
        Ok(())
    }
}
