//! Persistent storage for the engine.
//!
//! [`DurableStore`](durable::DurableStore) keeps edge relations, element and
//! association records, and the materialized closure in redb. Without a data
//! directory the engine runs memory-only and no store is opened.

pub mod durable;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Encode a record for a [`RecordTable`](durable::RecordTable).
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("failed to serialize record: {e}"),
    })
}

/// Decode a record read from a [`RecordTable`](durable::RecordTable).
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to deserialize record: {e}"),
    })
}
