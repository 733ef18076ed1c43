//! KvStore trait - the key/value store collaborator behind the engine.
//!
//! The engine only needs plain reads, prefix scans, writes and an ordered
//! change stream. Values are opaque strings; structure lives in the keys.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, Result};
use crate::key::KeyPath;
use crate::tree::{self, Node};
use crate::watch::WatchStream;

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Store-side key check.
///
/// Structural rules (leading `/`, no empty segments) are enforced by
/// [`KeyPath`] before the engine touches a store; backends accept any
/// non-empty key like the stores they model.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ConfigError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(ConfigError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// A hierarchical key/value store with a change stream.
///
/// Reads are expected to be linearizable and the watch stream ordered.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value at `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// All entries whose key starts with `prefix`.
    async fn get_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>>;

    /// Create or overwrite `key`.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`; deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key starting with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<()>;

    /// Stream of changes for keys starting with `prefix`.
    fn watch(&self, prefix: &str) -> Result<WatchStream>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Bound a store round trip by `timeout`.
pub async fn timed<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ConfigError::Timeout { operation, timeout })?
}

/// Scan everything below `key` and shape it into a tree.
///
/// Returns `None` when the scan yields no valid keys.
pub async fn scan_subtree(store: &dyn KvStore, key: &KeyPath, timeout: Duration) -> Result<Option<Node>> {
    let kvs = timed("get_by_prefix", timeout, store.get_by_prefix(&key.scan_prefix())).await?;
    let node = tree::build(key, kvs);
    Ok((!node.is_empty()).then_some(node))
}
