//! # Storemirror Store
//!
//! Journaled metadata store for mirrored remote file trees.
//!
//! This crate provides:
//! - The [`DomainRegistry`] of independent item namespaces
//! - The [`Item`] row model with upload and download lifecycles
//! - [`MetadataStore`]: durable rows with single-writer transactions
//! - Natural-order directory paging ([`SortKey`], [`natural_cmp`])
//!
//! ## Durability
//!
//! Every committed transaction is one CBOR record appended to a journal.
//! Opening a store replays the journal; compaction folds it into a
//! snapshot. A store directory is guarded by an exclusive `LOCK` file.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod dir;
mod domain;
mod error;
mod item;
mod journal;
mod order;
mod store;
mod tables;
mod transaction;
mod verify;

pub use config::StoreConfig;
pub use dir::StoreDir;
pub use domain::{Domain, DomainId, DomainRegistry, ROOT_ITEM_ID};
pub use error::{StoreError, StoreResult};
pub use item::{
    new_provisional_id, now_seconds, DownloadState, Item, UploadState, DEFAULT_CONTENT_TYPE,
    DIRECTORY_CONTENT_TYPE,
};
pub use journal::{FileJournal, JournalBackend, MemoryJournal};
pub use order::{compare_items, natural_cmp, sort_items, SortKey};
pub use store::MetadataStore;
pub use transaction::Transaction;
pub use verify::VerifyReport;
