//! In-memory key/value store.
//!
//! Not durable - data is lost on process exit. Use for testing and
//! development, or as a stand-in for a remote store in embedded setups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::store::{validate_key, KvStore};
use crate::watch::{WatchEvent, WatchSender, WatchStream};

/// In-memory implementation of [`KvStore`].
///
/// Uses a BTreeMap for ordered prefix scans and RwLock for concurrency.
/// Events are sent while the write lock is held, so subscribers observe
/// them in commit order.
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
    watcher: WatchSender,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a store whose watch channel buffers `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            watcher: WatchSender::new(capacity),
        }
    }

    /// Get the number of entries in the store.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn under_prefix<'a>(
    data: &'a BTreeMap<String, String>,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
    data.range(prefix.to_string()..)
        .take_while(move |(k, _)| k.starts_with(prefix))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let data = self.data.read();
        Ok(under_prefix(&data, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        let mut data = self.data.write();
        data.insert(key.to_string(), value.to_string());
        self.watcher.send(WatchEvent::put(key, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let mut data = self.data.write();
        if data.remove(key).is_some() {
            self.watcher.send(WatchEvent::delete(key));
        }
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<()> {
        let mut data = self.data.write();
        let doomed: Vec<String> = under_prefix(&data, prefix).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            data.remove(&key);
            self.watcher.send(WatchEvent::delete(key));
        }
        Ok(())
    }

    fn watch(&self, prefix: &str) -> Result<WatchStream> {
        Ok(self.watcher.subscribe(prefix))
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;
    use crate::error::ConfigError;
    use crate::watch::EventKind;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();

        store.put("/call/redis/address", "localhost").await.unwrap();
        let value = store.get("/call/redis/address").await.unwrap();
        assert_eq!(value.as_deref(), Some("localhost"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = MemoryStore::new();
        assert!(store.get("/nonexistent").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();

        store.put("/key", "value").await.unwrap();
        assert!(store.exists("/key").await.unwrap());

        store.delete("/key").await.unwrap();
        assert!(!store.exists("/key").await.unwrap());

        // Absent keys are fine.
        store.delete("/key").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_by_prefix() {
        let store = MemoryStore::new();

        store.put("/call/a", "1").await.unwrap();
        store.put("/call/b/c", "2").await.unwrap();
        store.put("/callx", "3").await.unwrap();
        store.put("/nodes/n1", "4").await.unwrap();

        let scan = store.get_by_prefix("/call/").await.unwrap();
        assert_eq!(scan.len(), 2);
        assert_eq!(scan.get("/call/b/c").map(String::as_str), Some("2"));

        let all = store.get_by_prefix("/").await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let store = MemoryStore::new();

        store.put("/test/1", "a").await.unwrap();
        store.put("/test/2", "b").await.unwrap();
        store.put("/keep", "c").await.unwrap();

        store.delete_by_prefix("/test/").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.exists("/keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_events_in_order() {
        let store = MemoryStore::new();
        let mut stream = store.watch("/call/").unwrap();

        store.put("/call/a", "1").await.unwrap();
        store.put("/other", "x").await.unwrap();
        store.delete("/call/a").await.unwrap();
        store.delete("/call/missing").await.unwrap();
        store.put("/call/b", "2").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!((first.key.as_str(), first.kind), ("/call/a", EventKind::Put));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!((second.key.as_str(), second.kind), ("/call/a", EventKind::Delete));
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third, WatchEvent::put("/call/b", "2"));
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let store = MemoryStore::new();

        let result = store.put("", "v").await;
        assert!(matches!(result, Err(ConfigError::InvalidKey(_))));
    }
}
