//! # univrs-config
//!
//! Typed, cached, watch-coherent access to hierarchical configuration held in
//! a key-value store.
//!
//! Keys are slash-delimited paths (`/call/redis/timeout`). A read either
//! fetches one value or scans a whole subtree and binds it onto a typed
//! destination:
//!
//! - **Scalars**: a single leaf, decoded as JSON with a raw-string fallback
//! - **Records**: structs whose fields are declared with [`bind_record!`]
//! - **Mappings**: `HashMap`/`BTreeMap` keyed by child segment
//! - **Indirections**: `Option`, `Box` and `Arc` around any of the above
//!
//! Results are cached per path. A background dispatcher consumes the store's
//! change stream, refreshes or evicts affected entries, and runs registered
//! change callbacks.
//!
//! ## Backends
//!
//! - [`SqliteStore`]: Embedded SQLite database
//! - [`MemoryStore`]: In-memory store (testing and development)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use univrs_config::{bind_record, Engine, EngineConfig, KvStore, MemoryStore};
//!
//! #[derive(Debug, Default)]
//! struct Redis {
//!     address: String,
//!     timeout: u32,
//! }
//!
//! bind_record!(Redis {
//!     "address" => address,
//!     "timeout" => timeout,
//! });
//!
//! #[tokio::main]
//! async fn main() -> univrs_config::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.put("/call/redis/address", "localhost:6379").await?;
//!     store.put("/call/redis/timeout", "30").await?;
//!
//!     let engine = Engine::new(store, EngineConfig::default())?;
//!     engine.start()?;
//!
//!     let redis: Redis = engine.get("/call/redis").await?;
//!     let timeout: u32 = engine.get("/call/redis/timeout").await?;
//!     println!("{:?} {}", redis, timeout);
//!
//!     engine.on_change("/call/", |event| println!("changed: {}", event.key));
//!     Ok(())
//! }
//! ```
//!
//! ## Namespaces
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use univrs_config::{Engine, EngineConfig, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> univrs_config::Result<()> {
//!     let store = Arc::new(SqliteStore::open("config.db").await?);
//!     let config = EngineConfig::default().with_address("localhost:2379/finance");
//!     let engine = Engine::new(store, config)?;
//!
//!     // Reads /finance/email
//!     let email: BTreeMap<String, String> = engine.get_in_namespace("email", 1).await?;
//!     println!("{:?}", email);
//!     Ok(())
//! }
//! ```

pub mod bind;
pub mod cache;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod key;
pub mod memory;
pub mod namespace;
pub mod sqlite;
pub mod store;
pub mod tree;
pub mod watch;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use bind::{Bind, BindKey, Encoded, Shape};
pub use cache::{Cache, CacheStats};
pub use codec::{Codec, JsonCodec};
pub use config::{Dsn, EngineConfig};
pub use dispatcher::{DispatcherState, WatchCallback, WatchDispatcher};
pub use engine::{global, install, Engine};
pub use error::{ConfigError, Result};
pub use key::KeyPath;
pub use memory::MemoryStore;
pub use namespace::Namespace;
pub use sqlite::SqliteStore;
pub use store::{KvStore, MAX_KEY_LENGTH};
pub use tree::Node;
pub use watch::{EventKind, WatchEvent, WatchSender, WatchStream};

/// Prelude for common imports
pub mod prelude {
    pub use crate::bind::{Bind, Encoded};
    pub use crate::bind_record;
    pub use crate::engine::Engine;
    pub use crate::error::{ConfigError, Result};
    pub use crate::memory::MemoryStore;
    pub use crate::sqlite::SqliteStore;
    pub use crate::store::KvStore;
    pub use crate::watch::{EventKind, WatchEvent};
}
