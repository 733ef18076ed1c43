//! Watch dispatcher: keeps the caches coherent with the store's change
//! stream and notifies registered observers.
//!
//! # Architecture
//!
//! One background task consumes the store's watch stream, strictly in order.
//! For each event it:
//! 1. skips keys that are not valid key paths
//! 2. refreshes the scalar entry for the key, if one is cached
//! 3. rescans every cached ancestor subtree (root down to the key itself)
//! 4. hands matching callbacks to a blocking task, so slow observers never
//!    stall consumption
//!
//! A lagged stream means events were lost; both caches are cleared and
//! repopulate on the next read. The loop stops when its CancellationToken is
//! cancelled or the stream closes.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::error::{ConfigError, Result};
use crate::key::KeyPath;
use crate::store::{scan_subtree, KvStore};
use crate::watch::{WatchEvent, WatchStream};

/// Observer invoked with every change under its registered prefix.
pub type WatchCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Stopped,
}

/// Callbacks grouped by key prefix, in registration order.
#[derive(Default)]
pub struct WatchRegistry {
    callbacks: RwLock<BTreeMap<String, Vec<WatchCallback>>>,
}

impl WatchRegistry {
    /// Append a callback under `prefix`; earlier registrations are kept.
    pub fn register(&self, prefix: impl Into<String>, callback: WatchCallback) {
        let prefix = prefix.into();
        self.callbacks
            .write()
            .entry(prefix.clone())
            .or_default()
            .push(callback);
        info!(prefix = %prefix, "watch callback registered");
    }

    /// Callbacks whose prefix is a prefix of `key`.
    pub fn matching(&self, key: &str) -> Vec<(String, WatchCallback)> {
        self.callbacks
            .read()
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .flat_map(|(prefix, callbacks)| {
                callbacks.iter().map(move |cb| (prefix.clone(), Arc::clone(cb)))
            })
            .collect()
    }

    /// Total number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumes store change events and reconciles the caches.
pub struct WatchDispatcher {
    store: Arc<dyn KvStore>,
    cache: Arc<Cache>,
    registry: WatchRegistry,
    request_timeout: Duration,
    watch_prefix: String,
    cancel: OnceLock<CancellationToken>,
    stopped: AtomicBool,
}

impl WatchDispatcher {
    pub fn new(
        store: Arc<dyn KvStore>,
        cache: Arc<Cache>,
        request_timeout: Duration,
        watch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            registry: WatchRegistry::default(),
            request_timeout,
            watch_prefix: watch_prefix.into(),
            cancel: OnceLock::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn state(&self) -> DispatcherState {
        match self.cancel.get() {
            None => DispatcherState::Idle,
            Some(_) if self.stopped.load(Ordering::SeqCst) => DispatcherState::Stopped,
            Some(_) => DispatcherState::Running,
        }
    }

    /// Start the watch loop. Only the first call has an effect.
    ///
    /// The store subscription is taken before this returns, so every change
    /// made afterwards is observed. Outside a tokio runtime this fails with
    /// [`ConfigError::RuntimeUnavailable`] and the dispatcher stays idle.
    pub fn start(self: &Arc<Self>) -> Result<DispatcherState> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigError::RuntimeUnavailable(e.to_string()))?;
        if self.cancel.get().is_some() {
            debug!("watch dispatcher already started");
            return Ok(self.state());
        }

        let stream = self.store.watch(&self.watch_prefix)?;
        let cancel = CancellationToken::new();
        if self.cancel.set(cancel.clone()).is_err() {
            debug!("watch dispatcher already started");
            return Ok(self.state());
        }

        runtime.spawn(Arc::clone(self).run(stream, cancel));
        Ok(DispatcherState::Running)
    }

    /// Stop the watch loop. Callbacks already handed off still run.
    pub fn shutdown(&self) {
        if let Some(cancel) = self.cancel.get() {
            cancel.cancel();
        }
    }

    async fn run(self: Arc<Self>, mut stream: WatchStream, cancel: CancellationToken) {
        info!(prefix = %self.watch_prefix, "watch dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("watch dispatcher shutting down");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        self.handle_event(&event).await;
                    }
                    Some(Err(ConfigError::WatchLagged(dropped))) => {
                        warn!(dropped, "watch stream lagged, clearing caches");
                        self.cache.clear();
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "watch stream error");
                    }
                    None => {
                        warn!("watch stream closed");
                        break;
                    }
                }
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Apply one change event to the caches and dispatch its callbacks.
    ///
    /// Returns the handle of the callback task, if any callback matched.
    pub async fn handle_event(&self, event: &WatchEvent) -> Option<JoinHandle<()>> {
        info!(key = %event.key, kind = ?event.kind, "config change observed");
        if !KeyPath::is_valid(&event.key) {
            debug!(key = %event.key, "skipping event for invalid key");
            return None;
        }
        let key = KeyPath::normalize(&event.key).ok()?;

        if self.cache.refresh_scalar(&key, event.new_value()) {
            debug!(key = %key, "scalar cache refreshed");
        }

        for ancestor in key.ancestors() {
            if !self.cache.has_subtree(&ancestor) {
                continue;
            }
            match scan_subtree(self.store.as_ref(), &ancestor, self.request_timeout).await {
                Ok(Some(node)) => {
                    debug!(key = %ancestor, tree = %node.preview(), "subtree cache refreshed");
                    self.cache.replace_subtree(&ancestor, node);
                }
                Ok(None) => {
                    debug!(key = %ancestor, "subtree now empty, evicted");
                    self.cache.evict_subtree(&ancestor);
                }
                Err(e) => {
                    warn!(key = %ancestor, error = %e, "subtree rescan failed, evicted");
                    self.cache.evict_subtree(&ancestor);
                }
            }
        }

        self.dispatch(event)
    }

    fn dispatch(&self, event: &WatchEvent) -> Option<JoinHandle<()>> {
        let callbacks = self.registry.matching(&event.key);
        if callbacks.is_empty() {
            return None;
        }
        let event = event.clone();
        Some(tokio::task::spawn_blocking(move || run_callbacks(&event, callbacks)))
    }
}

fn run_callbacks(event: &WatchEvent, callbacks: Vec<(String, WatchCallback)>) {
    debug!(key = %event.key, count = callbacks.len(), "running watch callbacks");
    for (prefix, callback) in callbacks {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
            error!(
                key = %event.key,
                prefix = %prefix,
                panic = %panic_message(payload.as_ref()),
                "watch callback panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::eventually;
    use crate::tree::Node;

    fn path(key: &str) -> KeyPath {
        KeyPath::normalize(key).unwrap()
    }

    fn dispatcher(store: Arc<MemoryStore>) -> (Arc<WatchDispatcher>, Arc<Cache>) {
        let cache = Arc::new(Cache::new());
        let dispatcher = Arc::new(WatchDispatcher::new(
            store,
            Arc::clone(&cache),
            Duration::from_secs(1),
            "/",
        ));
        (dispatcher, cache)
    }

    async fn cache_subtree(cache: &Cache, store: &MemoryStore, key: &str) {
        let key = path(key);
        cache
            .subtree_or_populate(&key, || scan_subtree(store, &key, Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(cache.has_subtree(&key));
    }

    #[tokio::test]
    async fn test_scalar_refresh_only_existing() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache
            .scalar_or_populate(&path("/a"), || async { Ok(Some("1".to_string())) })
            .await
            .unwrap();

        dispatcher.handle_event(&WatchEvent::put("/a", "2")).await;
        dispatcher.handle_event(&WatchEvent::put("/b", "3")).await;

        assert_eq!(cache.scalar(&path("/a")).as_deref(), Some("2"));
        assert!(cache.scalar(&path("/b")).is_none());

        dispatcher.handle_event(&WatchEvent::delete("/a")).await;
        assert!(cache.scalar(&path("/a")).is_none());
    }

    #[tokio::test]
    async fn test_cached_ancestors_rescanned() {
        let store = Arc::new(MemoryStore::new());
        store.put("/call/redis/address", "localhost").await.unwrap();
        store.put("/call/redis/timeout", "30").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/call/redis").await;
        cache_subtree(&cache, &store, "/call").await;

        store.delete("/call/redis/timeout").await.unwrap();
        dispatcher
            .handle_event(&WatchEvent::delete("/call/redis/timeout"))
            .await;

        let redis = cache.subtree(&path("/call/redis")).unwrap();
        assert!(redis.get("timeout").is_none());
        assert_eq!(redis.get("address").and_then(Node::leaf), Some("localhost"));
        let call = cache.subtree(&path("/call")).unwrap();
        assert!(call.get("redis/timeout").is_none());
        assert!(!cache.has_subtree(&path("/")));
    }

    #[tokio::test]
    async fn test_empty_rescan_evicts() {
        let store = Arc::new(MemoryStore::new());
        store.put("/tmp/only", "x").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/tmp").await;

        store.delete("/tmp/only").await.unwrap();
        dispatcher.handle_event(&WatchEvent::delete("/tmp/only")).await;
        assert!(!cache.has_subtree(&path("/tmp")));
    }

    #[tokio::test]
    async fn test_invalid_key_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.put("/a/b", "1").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/a").await;

        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        dispatcher
            .registry()
            .register("/", Arc::new(move |_: &WatchEvent| *counter.lock() += 1));

        for key in ["/a//b", "/a/", "a/b"] {
            assert!(dispatcher.handle_event(&WatchEvent::put(key, "2")).await.is_none());
        }
        assert_eq!(*hits.lock(), 0);
        assert_eq!(cache.subtree(&path("/a")).unwrap().get("b").and_then(Node::leaf), Some("1"));
    }

    #[tokio::test]
    async fn test_callbacks_ordered_and_isolated() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, _cache) = dispatcher(store);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        dispatcher
            .registry()
            .register("/call", Arc::new(move |e: &WatchEvent| first.lock().push(format!("1:{}", e.key))));
        dispatcher
            .registry()
            .register("/call", Arc::new(|_: &WatchEvent| panic!("observer failure")));
        let third = Arc::clone(&seen);
        dispatcher
            .registry()
            .register("/call", Arc::new(move |_: &WatchEvent| third.lock().push("3".to_string())));
        let other = Arc::clone(&seen);
        dispatcher
            .registry()
            .register("/other", Arc::new(move |_: &WatchEvent| other.lock().push("other".to_string())));
        assert_eq!(dispatcher.registry().len(), 4);

        let handle = dispatcher
            .handle_event(&WatchEvent::put("/call/redis", "x"))
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(*seen.lock(), vec!["1:/call/redis".to_string(), "3".to_string()]);
        assert!(dispatcher.handle_event(&WatchEvent::put("/nobody", "x")).await.is_none());
    }

    #[test]
    fn test_registry_matching_by_prefix() {
        let registry = WatchRegistry::default();
        assert!(registry.is_empty());
        registry.register("/call", Arc::new(|_: &WatchEvent| {}));
        registry.register("/call/redis", Arc::new(|_: &WatchEvent| {}));

        assert_eq!(registry.matching("/call/redis/timeout").len(), 2);
        assert_eq!(registry.matching("/call/env").len(), 1);
        assert!(registry.matching("/other").is_empty());
    }

    #[tokio::test]
    async fn test_start_once_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.put("/call/a", "1").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/call").await;
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        assert_eq!(dispatcher.start().unwrap(), DispatcherState::Running);
        assert_eq!(dispatcher.start().unwrap(), DispatcherState::Running);

        store.put("/call/b", "2").await.unwrap();
        assert!(
            eventually(|| cache
                .subtree(&path("/call"))
                .is_some_and(|n| n.get("b").is_some()))
            .await
        );

        dispatcher.shutdown();
        assert!(eventually(|| dispatcher.state() == DispatcherState::Stopped).await);
    }

    #[test]
    fn test_start_outside_runtime() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, _cache) = dispatcher(store);

        let err = dispatcher.start().unwrap_err();
        assert!(matches!(err, ConfigError::RuntimeUnavailable(_)));
        assert!(!err.is_retryable());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }

    #[tokio::test]
    async fn test_blocked_callback_does_not_stall_loop() {
        let store = Arc::new(MemoryStore::new());
        store.put("/call/redis/timeout", "30").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/call/redis").await;

        let gate = Arc::new(std::sync::Barrier::new(2));
        let entered = Arc::new(AtomicBool::new(false));
        let (callback_gate, callback_entered) = (Arc::clone(&gate), Arc::clone(&entered));
        dispatcher.registry().register(
            "/slow/",
            Arc::new(move |_: &WatchEvent| {
                callback_entered.store(true, Ordering::SeqCst);
                callback_gate.wait();
            }),
        );
        dispatcher.start().unwrap();

        store.put("/slow/job", "1").await.unwrap();
        assert!(eventually(|| entered.load(Ordering::SeqCst)).await);

        store.put("/call/redis/timeout", "60").await.unwrap();
        assert!(
            eventually(|| cache
                .subtree(&path("/call/redis"))
                .is_some_and(|n| n.get("timeout").and_then(Node::leaf) == Some("60")))
            .await
        );

        tokio::task::spawn_blocking(move || gate.wait()).await.unwrap();
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_lag_clears_caches() {
        let store = Arc::new(MemoryStore::with_capacity(1));
        store.put("/z/k", "1").await.unwrap();
        let (dispatcher, cache) = dispatcher(Arc::clone(&store));
        cache_subtree(&cache, &store, "/z").await;

        dispatcher.start().unwrap();
        // Current-thread runtime: the loop cannot run until we yield.
        for i in 0..5 {
            store.put(&format!("/burst/{i}"), "x").await.unwrap();
        }

        assert!(eventually(|| !cache.has_subtree(&path("/z"))).await);
        dispatcher.shutdown();
    }
}
