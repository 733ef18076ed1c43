//! The materialization engine.
//!
//! [`Engine`] is the single context object callers hold: it resolves paths,
//! consults the caches, falls back to the store on a miss, binds the result
//! onto the requested type, and owns the watch dispatcher that keeps the
//! caches coherent.
//!
//! Processes that want one implicit engine can [`install`] it once and reach
//! it through [`global`].

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::bind::{Bind, Shape};
use crate::cache::Cache;
use crate::codec::{Codec, JsonCodec};
use crate::config::EngineConfig;
use crate::dispatcher::{DispatcherState, WatchDispatcher};
use crate::error::{ConfigError, Result};
use crate::key::KeyPath;
use crate::namespace::Namespace;
use crate::store::{scan_subtree, timed, KvStore};
use crate::tree::Node;
use crate::watch::WatchEvent;

struct Inner<C> {
    store: Arc<dyn KvStore>,
    cache: Arc<Cache>,
    namespace: Namespace,
    dispatcher: Arc<WatchDispatcher>,
    codec: C,
    config: EngineConfig,
}

/// Typed, cached access to a hierarchical configuration store.
///
/// Cloning is cheap; clones share caches, namespace and dispatcher.
pub struct Engine<C: Codec = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine<JsonCodec> {
    /// Create an engine with JSON leaf encoding.
    pub fn new(store: Arc<dyn KvStore>, config: EngineConfig) -> Result<Self> {
        Self::with_codec(store, config, JsonCodec)
    }

    /// Create an engine configured from the environment.
    ///
    /// Fails with [`ConfigError::NotInitialized`] when no address is set.
    pub fn from_env(store: Arc<dyn KvStore>) -> Result<Self> {
        let config = EngineConfig::from_env().ok_or(ConfigError::NotInitialized)?;
        Self::new(store, config)
    }
}

impl<C: Codec> Engine<C> {
    /// Create an engine with a custom leaf codec.
    ///
    /// The namespace is seeded from the address path, if one is configured.
    pub fn with_codec(store: Arc<dyn KvStore>, config: EngineConfig, codec: C) -> Result<Self> {
        let namespace = Namespace::new();
        if let Some(dsn) = config.dsn()? {
            namespace.set(&dsn.path);
        }

        let cache = Arc::new(Cache::new());
        let dispatcher = Arc::new(WatchDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.request_timeout,
            config.watch_prefix.clone(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                cache,
                namespace,
                dispatcher,
                codec,
                config,
            }),
        })
    }

    /// Start the watch dispatcher; later calls are no-ops.
    pub fn start(&self) -> Result<DispatcherState> {
        self.inner.dispatcher.start()
    }

    /// Stop the watch dispatcher.
    pub fn shutdown(&self) {
        self.inner.dispatcher.shutdown();
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.dispatcher.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Read `key` as a `T`.
    pub async fn get<T: Bind>(&self, key: &str) -> Result<T> {
        let key = KeyPath::normalize(key)?;
        let node = self.load(&key, T::target_shape()).await?;
        T::materialize(&node, &self.inner.codec)
    }

    /// Bind `key` onto an existing value; fields absent from the store keep
    /// their current contents.
    pub async fn get_into<T: Bind>(&self, key: &str, dest: &mut T) -> Result<()> {
        let key = KeyPath::normalize(key)?;
        let node = self.load(&key, T::target_shape()).await?;
        dest.bind(&node, &self.inner.codec)
    }

    /// Read `key` relative to the first `level` namespace segments.
    ///
    /// # Panics
    ///
    /// See [`Namespace::resolve`].
    pub async fn get_in_namespace<T: Bind>(&self, key: &str, level: usize) -> Result<T> {
        let key = self.inner.namespace.resolve(key, level)?;
        let node = self.load(&key, T::target_shape()).await?;
        T::materialize(&node, &self.inner.codec)
    }

    async fn load(&self, key: &KeyPath, shape: Shape) -> Result<Arc<Node>> {
        let inner = &self.inner;
        let timeout = inner.config.request_timeout;

        if shape.is_subtree() {
            let node = inner
                .cache
                .subtree_or_populate(key, || scan_subtree(inner.store.as_ref(), key, timeout))
                .await?;
            return node.ok_or_else(|| ConfigError::EmptyResult(key.to_string()));
        }

        let value = inner
            .cache
            .scalar_or_populate(key, || timed("get", timeout, inner.store.get(key.as_str())))
            .await?;
        value
            .map(|v| Arc::new(Node::Leaf(v)))
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Register `callback` for every change under `prefix`.
    ///
    /// Callbacks run off the watch loop, in registration order; a panicking
    /// callback is logged and does not affect the others.
    pub fn on_change<F>(&self, prefix: impl Into<String>, callback: F)
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.registry().register(prefix, Arc::new(callback));
    }

    /// Encode `value` with the engine's codec and write it to `key`.
    ///
    /// Caches pick the change up through the watch stream.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = self.inner.codec.encode(value)?;
        self.put_raw(key, &encoded).await
    }

    /// Write a raw store value to `key`.
    pub async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let key = KeyPath::normalize(key)?;
        let timeout = self.inner.config.request_timeout;
        timed("put", timeout, self.inner.store.put(key.as_str(), value)).await
    }

    /// Delete `key`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = KeyPath::normalize(key)?;
        let timeout = self.inner.config.request_timeout;
        timed("delete", timeout, self.inner.store.delete(key.as_str())).await
    }

    /// Delete every key below `key`.
    pub async fn delete_tree(&self, key: &str) -> Result<()> {
        let key = KeyPath::normalize(key)?;
        let timeout = self.inner.config.request_timeout;
        timed(
            "delete_by_prefix",
            timeout,
            self.inner.store.delete_by_prefix(&key.scan_prefix()),
        )
        .await
    }

    /// Keys that are absent or empty, and prefixes with nothing below them.
    pub async fn missing_keys(&self, keys: &[&str], prefixes: &[&str]) -> Result<Vec<String>> {
        let timeout = self.inner.config.request_timeout;
        let store = self.inner.store.as_ref();
        let mut missing = Vec::new();

        for raw in keys {
            let key = KeyPath::normalize(raw)?;
            let value = timed("get", timeout, store.get(key.as_str())).await?;
            if value.map_or(true, |v| v.is_empty()) {
                missing.push(key.to_string());
            }
        }
        for raw in prefixes {
            let key = KeyPath::normalize(raw)?;
            if scan_subtree(store, &key, timeout).await?.is_none() {
                missing.push(key.scan_prefix());
            }
        }

        if !missing.is_empty() {
            warn!(missing = ?missing, "required configuration keys missing");
        }
        Ok(missing)
    }

    /// Startup assertion that every required key is present.
    ///
    /// # Panics
    ///
    /// Panics if any key or prefix is missing or the store cannot be read: a
    /// deployment without its required configuration cannot run.
    pub async fn assert_keys(&self, keys: &[&str], prefixes: &[&str]) {
        match self.missing_keys(keys, prefixes).await {
            Ok(missing) if missing.is_empty() => {
                debug!(keys = keys.len(), prefixes = prefixes.len(), "required keys present");
            }
            Ok(missing) => panic!("{}", ConfigError::MissingKeys(missing)),
            Err(e) => panic!("required key check failed: {e}"),
        }
    }
}

static GLOBAL: OnceLock<Engine> = OnceLock::new();

/// Install the process-wide engine. The first call wins.
pub fn install(engine: Engine) -> bool {
    match GLOBAL.set(engine) {
        Ok(()) => true,
        Err(_) => {
            warn!("global config engine already installed, ignoring");
            false
        }
    }
}

/// The process-wide engine, if one was installed.
pub fn global() -> Result<&'static Engine> {
    GLOBAL.get().ok_or(ConfigError::NotInitialized)
}
