//! Key-value persistence seam for consensus state.
//!
//! The storage engine itself is external to the consensus core; this crate
//! defines the narrow [`KeyValueStore`] trait the core persists through, the
//! key namespaces it owns, and an in-memory implementation used by tests and
//! by nodes running without durable storage.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should use `spawn_blocking` if the backing store can block.

pub mod keys;

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Error type for storage operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Backing database error.
    #[error("database error: {0}")]
    Database(String),
}

/// A minimal ordered key-value store.
///
/// Implementations must be safe for concurrent use; the consensus core
/// shares a store handle between the engine and the runner.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under a key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value under a key, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting an absent key is a no-op.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// All (key, value) pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// In-memory `KeyValueStore` backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
