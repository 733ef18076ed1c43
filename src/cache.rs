//! Scalar and subtree caches.
//!
//! Both caches are unbounded and invalidation driven: entries are created on
//! the first non-empty lookup and afterwards only changed by the watch
//! dispatcher. Empty results are never cached.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::key::KeyPath;
use crate::tree::Node;

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub scalars: usize,
    pub subtrees: usize,
}

/// Concurrent caches keyed by absolute key path.
#[derive(Debug, Default)]
pub struct Cache {
    scalars: DashMap<KeyPath, String>,
    subtrees: DashMap<KeyPath, Arc<Node>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached scalar for `key`, or the result of `populate` on a miss.
    ///
    /// `None` and empty strings are returned but not cached.
    pub async fn scalar_or_populate<F, Fut>(&self, key: &KeyPath, populate: F) -> Result<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        if let Some(value) = self.scalars.get(key).map(|v| v.clone()) {
            debug!(key = %key, "scalar cache hit");
            return Ok(Some(value));
        }

        debug!(key = %key, "scalar cache miss");
        let value = populate().await?;
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            self.scalars.insert(key.clone(), v.to_string());
        }
        Ok(value)
    }

    /// Cached subtree for `key`, or the result of `populate` on a miss.
    ///
    /// `None` and empty branches are returned but not cached.
    pub async fn subtree_or_populate<F, Fut>(&self, key: &KeyPath, populate: F) -> Result<Option<Arc<Node>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Node>>>,
    {
        if let Some(node) = self.subtrees.get(key).map(|n| Arc::clone(&n)) {
            debug!(key = %key, "subtree cache hit");
            return Ok(Some(node));
        }

        debug!(key = %key, "subtree cache miss");
        let node = populate().await?.map(Arc::new);
        if let Some(n) = node.as_ref().filter(|n| !n.is_empty()) {
            self.subtrees.insert(key.clone(), Arc::clone(n));
        }
        Ok(node)
    }

    /// Update an existing scalar entry; `None` or an empty value evicts it.
    ///
    /// Keys that were never cached stay uncached. Returns whether an entry
    /// was touched.
    pub fn refresh_scalar(&self, key: &KeyPath, value: Option<&str>) -> bool {
        match value.filter(|v| !v.is_empty()) {
            Some(v) => match self.scalars.get_mut(key) {
                Some(mut entry) => {
                    *entry = v.to_string();
                    true
                }
                None => false,
            },
            None => self.scalars.remove(key).is_some(),
        }
    }

    pub fn scalar(&self, key: &KeyPath) -> Option<String> {
        self.scalars.get(key).map(|v| v.clone())
    }

    pub fn subtree(&self, key: &KeyPath) -> Option<Arc<Node>> {
        self.subtrees.get(key).map(|n| Arc::clone(&n))
    }

    pub fn has_subtree(&self, key: &KeyPath) -> bool {
        self.subtrees.contains_key(key)
    }

    pub fn replace_subtree(&self, key: &KeyPath, node: Node) {
        self.subtrees.insert(key.clone(), Arc::new(node));
    }

    pub fn evict_subtree(&self, key: &KeyPath) -> bool {
        self.subtrees.remove(key).is_some()
    }

    /// Drop every entry from both caches.
    pub fn clear(&self) {
        self.scalars.clear();
        self.subtrees.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            scalars: self.scalars.len(),
            subtrees: self.subtrees.len(),
        }
    }
}
