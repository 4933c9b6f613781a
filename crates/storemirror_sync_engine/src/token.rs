//! Opaque continuation tokens handed to the host.
//!
//! Both tokens are CBOR maps. Hosts store them verbatim and pass them
//! back; the engine never trusts their contents. A page token that fails
//! to decode restarts the listing from the first page, and an anchor
//! token that fails to decode means "from anchor 0".

use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storemirror_store::SortKey;
use tracing::debug;

fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SyncResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| SyncError::Decode(e.to_string()))
}

/// Position within a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    /// Ordering of the listing.
    pub sort_key: SortKey,
    /// Number of items already returned.
    pub offset: u64,
    /// Items per page.
    pub batch_size: u32,
}

impl PageToken {
    /// First page in name order.
    #[must_use]
    pub fn initial(batch_size: u32) -> Self {
        Self {
            sort_key: SortKey::ByName,
            offset: 0,
            batch_size: batch_size.max(1),
        }
    }

    /// First page in creation-date order.
    #[must_use]
    pub fn initial_by_date(batch_size: u32) -> Self {
        Self {
            sort_key: SortKey::ByCreationDate,
            ..Self::initial(batch_size)
        }
    }

    /// The token for the page after one that returned `returned` items.
    #[must_use]
    pub fn advance(self, returned: usize) -> Self {
        Self {
            offset: self.offset.saturating_add(returned as u64),
            ..self
        }
    }

    /// Encodes the token.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization fails.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes a token.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the bytes are not a page token.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        decode(bytes)
    }

    /// Decodes a host-supplied token, falling back to the first page in
    /// name order when it is absent or unreadable.
    #[must_use]
    pub fn decode_or_initial(bytes: Option<&[u8]>, default_batch: u32) -> Self {
        let Some(bytes) = bytes else {
            return Self::initial(default_batch);
        };
        match Self::decode(bytes) {
            Ok(token) if token.batch_size > 0 => token,
            Ok(token) => Self {
                batch_size: default_batch.max(1),
                ..token
            },
            Err(err) => {
                debug!(error = %err, "unreadable page token; restarting listing");
                Self::initial(default_batch)
            }
        }
    }
}

/// Position within a directory's change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnchorToken {
    /// Last anchor the host has observed.
    pub anchor: i64,
}

impl AnchorToken {
    /// Creates a token.
    #[must_use]
    pub fn new(anchor: i64) -> Self {
        Self { anchor }
    }

    /// Encodes the token.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization fails.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes a token.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the bytes are not an anchor token.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        decode(bytes)
    }

    /// Decodes a host-supplied token, treating absent or unreadable
    /// input as anchor 0.
    #[must_use]
    pub fn decode_or_zero(bytes: Option<&[u8]>) -> Self {
        match bytes.map(Self::decode) {
            Some(Ok(token)) => token,
            Some(Err(err)) => {
                debug!(error = %err, "unreadable anchor token; using anchor 0");
                Self::default()
            }
            None => Self::default(),
        }
    }
}
