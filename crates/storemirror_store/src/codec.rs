//! CBOR helpers shared by the journal and snapshots.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as CBOR.
pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| StoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| StoreError::codec(e.to_string()))
}
