//! Store trait and error types

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error for {key}: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Namespaced JSON blob storage contract
///
/// Keys are slash-separated paths (`items/core/{id}.json`). Implementations
/// must be safe to share across concurrently running tasks.
pub trait KvStore: Send + Sync {
    /// Reads the raw JSON blob at `key`, if present
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes the raw JSON blob at `key`, replacing any existing value
    fn put_raw(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Lists all keys starting with `prefix`
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Typed helpers over the raw blob contract
pub trait KvStoreExt: KvStore {
    /// Reads and deserializes the value at `key`
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => {
                let value =
                    serde_json::from_str(&raw).map_err(|source| StoreError::Serialization {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serializes and writes `value` at `key`
    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(key, &raw)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}
