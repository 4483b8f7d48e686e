//! Abstraction over the per-shard durable key-value store.
//!
//! A shard's storage engine is modeled as an opaque durable key-value store
//! with list-by-prefix, grounded on the teacher's object-store quartet
//! (`get_object`/`put_object`/`delete_object`/`list_objects`). This crate
//! ships only the in-memory implementation used by every shard in this
//! workspace; production deployments would swap in a file- or object-store
//! backed implementation without touching callers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Durable key-value store with list-by-prefix, the storage primitive a
/// shard builds its document table and collection index on top of.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetches the bytes stored at `key`. Returns `Ok(None)` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` at `key`, replacing any prior value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Removes `key`. Succeeds even if the key was absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists every key with the given prefix, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory `DurableStore`, backing every shard in this workspace.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

impl std::fmt::Debug for MemoryDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDurableStore")
            .field("len", &self.entries.read().len())
            .finish()
    }
}

/// Convenience error for durable-store callers that need a generic failure.
#[must_use]
pub fn io_error(message: impl Into<String>) -> Error {
    Error::Internal(message.into())
}
