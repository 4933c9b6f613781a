//! Journal framing.
//!
//! ```text
//! | len: u32 LE | CBOR(JournalRecord) |
//! ```
//!
//! A frame cut short at the end of the log is a torn write from a crash
//! and is dropped on replay. Any other undecodable frame is corruption.

use crate::codec;
use crate::domain::DomainId;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use serde::{Deserialize, Serialize};

const LEN_SIZE: usize = 4;

/// One row mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum RowWrite {
    /// Insert or replace the row keyed by `(item.domain, item.id)`.
    Put(Item),
    /// Remove a row.
    Delete {
        /// Domain of the row.
        domain: DomainId,
        /// Item id.
        id: String,
    },
}

/// A replayable journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum JournalRecord {
    /// Writes of one committed transaction.
    Commit {
        /// Commit sequence number.
        sequence: u64,
        /// Row mutations in apply order.
        writes: Vec<RowWrite>,
    },
    /// Full table contents written by compaction.
    Snapshot {
        /// Last sequence number folded into the snapshot.
        sequence: u64,
        /// Every row.
        rows: Vec<Item>,
    },
}

impl JournalRecord {
    pub(crate) fn sequence(&self) -> u64 {
        match self {
            Self::Commit { sequence, .. } | Self::Snapshot { sequence, .. } => *sequence,
        }
    }
}

/// Result of scanning a journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub(crate) records: Vec<JournalRecord>,
    pub(crate) torn_tail: bool,
}

pub(crate) fn encode_frame(record: &JournalRecord) -> StoreResult<Vec<u8>> {
    let payload = codec::encode(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::codec("journal record exceeds 4 GiB"))?;

    let mut frame = Vec::with_capacity(LEN_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub(crate) fn decode_frames(bytes: &[u8]) -> StoreResult<Replay> {
    let mut replay = Replay::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let Some(header) = bytes.get(pos..pos + LEN_SIZE) else {
            replay.torn_tail = true;
            break;
        };
        let mut len_bytes = [0u8; LEN_SIZE];
        len_bytes.copy_from_slice(header);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let start = pos + LEN_SIZE;
        let Some(payload) = bytes.get(start..start + len) else {
            replay.torn_tail = true;
            break;
        };

        let record = codec::decode(payload)
            .map_err(|e| StoreError::journal_corrupted(pos as u64, e.to_string()))?;
        replay.records.push(record);
        pos = start + len;
    }

    Ok(replay)
}
