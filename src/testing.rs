//! Test helpers shared across modules.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::store::KvStore;
use crate::watch::WatchStream;

/// Poll `check` until it holds, for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A [`MemoryStore`] that counts read round trips.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    gets: AtomicUsize,
    scans: AtomicUsize,
}

impl CountingStore {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.delete_by_prefix(prefix).await
    }

    fn watch(&self, prefix: &str) -> Result<WatchStream> {
        self.inner.watch(prefix)
    }
}

/// A store whose reads never complete.
pub struct StalledStore;

#[async_trait]
impl KvStore for StalledStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        std::future::pending().await
    }

    async fn get_by_prefix(&self, _prefix: &str) -> Result<BTreeMap<String, String>> {
        std::future::pending().await
    }

    async fn put(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn watch(&self, prefix: &str) -> Result<WatchStream> {
        Ok(crate::watch::WatchSender::new(1).subscribe(prefix))
    }
}
