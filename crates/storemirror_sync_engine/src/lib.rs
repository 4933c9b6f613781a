//! # Storemirror Sync Engine
//!
//! Keeps a local [`MetadataStore`](storemirror_store::MetadataStore) mirror
//! of a remote file store consistent with it.
//!
//! This crate provides:
//! - Paginated directory listing from the local mirror
//! - Anchor-based change enumeration, applied one batch per transaction
//! - Reconciliation of locally staged items with remote confirmations
//! - Upload and download state machines driven by a transfer queue
//! - The [`RemoteStoreClient`] and [`FilesystemHost`] seams, with
//!   [`MockRemote`] and [`RecordingHost`] for tests
//!
//! ## Key Invariants
//!
//! - The remote is authoritative for confirmed items
//! - A directory's anchor never moves backwards
//! - A change batch is applied entirely or not at all
//! - No remote call runs while a store transaction is open
//! - Transfer completions for deleted rows are no-ops

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod artifact;
mod config;
mod engine;
mod error;
mod host;
mod mock;
mod reconcile;
mod remote;
mod staging;
mod token;
mod transfer;

pub use config::{SyncConfig, DEFAULT_BATCH_SIZE};
pub use engine::{ChangeSet, ListPage, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use host::{FilesystemHost, NoopHost, RecordingHost};
pub use mock::MockRemote;
pub use remote::RemoteStoreClient;
pub use token::{AnchorToken, PageToken};
pub use transfer::{
    CompletionReport, CompletionStatus, TransferDirection, TransferJob, TransferJobs,
    TransferKind, TransferOutcome, TransferSuccess, INTERRUPTED,
};
