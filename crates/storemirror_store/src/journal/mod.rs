//! Append-only journal of committed transactions.
//!
//! The journal is an opaque byte log. The store frames CBOR records into
//! it (see [`record`]) and replays them on open. Compaction replaces the
//! whole log with a single snapshot record.

mod file;
mod memory;
pub(crate) mod record;

pub use file::FileJournal;
pub use memory::MemoryJournal;

use crate::error::StoreResult;

/// Byte log backing a [`MetadataStore`](crate::MetadataStore).
///
/// # Invariants
///
/// - `read_all` returns every byte previously appended, in order
/// - after `sync` returns, appended bytes survive process termination
/// - `replace` is atomic: a crash leaves either the old or the new contents
pub trait JournalBackend: Send + Sync {
    /// Reads the entire log.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StoreResult<Vec<u8>>;

    /// Appends bytes and returns the offset they were written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Makes appended bytes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StoreResult<()>;

    /// Current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StoreResult<u64>;

    /// Atomically replaces the log contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written.
    fn replace(&mut self, data: &[u8]) -> StoreResult<()>;
}
