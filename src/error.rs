//! Error types for configuration materialization.
//!
//! Covers the whole path from key validation through store round trips to
//! binding a decoded tree onto a destination.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reading, caching or binding configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed key path.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A scalar lookup found nothing at the key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A prefix scan yielded no usable entries.
    #[error("no configuration found under {0}")]
    EmptyResult(String),

    /// The destination cannot be mutated (e.g. a shared `Arc`).
    #[error("destination of type {0} is not assignable")]
    NonAssignable(&'static str),

    /// An empty indirection whose target type cannot be allocated.
    #[error("cannot allocate destination of type {0}")]
    NilDestination(&'static str),

    /// An indirection pointing to another indirection.
    #[error("destination {0} is an indirection to an indirection")]
    DoubleIndirection(&'static str),

    /// More namespace levels were requested than the namespace has.
    #[error("namespace level {requested} requested, only {available} available")]
    InvalidNamespaceLevel { requested: usize, available: usize },

    /// The decoded node does not fit the destination's shape.
    #[error("cannot bind {found} onto {expected} destination {type_name}")]
    UnknownResultShape {
        found: &'static str,
        expected: &'static str,
        type_name: &'static str,
    },

    /// Required keys absent at startup.
    #[error("missing required keys: {0:?}")]
    MissingKeys(Vec<String>),

    /// The store address could not be parsed.
    #[error("invalid store address: {0}")]
    InvalidAddress(String),

    /// No engine has been installed for this process.
    #[error("configuration engine not initialized")]
    NotInitialized,

    /// A store round trip exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Cannot connect to or communicate with the store.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The watch receiver fell behind and dropped events.
    #[error("watch stream lagged, {0} events dropped")]
    WatchLagged(u64),

    /// Codec failure while encoding or decoding a leaf.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// A background task was requested outside a tokio runtime.
    #[error("no tokio runtime: {0}")]
    RuntimeUnavailable(String),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    /// Returns true for transport failures that may succeed on a later attempt.
    ///
    /// Nothing in this crate retries; callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfigError::Timeout { .. }
                | ConfigError::ConnectionError(_)
                | ConfigError::DatabaseError(_)
        )
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::KeyNotFound("/call/redis".to_string());
        assert!(err.to_string().contains("key not found"));
        assert!(err.to_string().contains("/call/redis"));
    }

    #[test]
    fn test_namespace_level_display() {
        let err = ConfigError::InvalidNamespaceLevel {
            requested: 3,
            available: 2,
        };
        assert!(err.to_string().contains("level 3"));
        assert!(err.to_string().contains("only 2"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ConfigError::Timeout {
            operation: "get",
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ConfigError::ConnectionError("refused".to_string()).is_retryable());
        assert!(!ConfigError::InvalidKey("//".to_string()).is_retryable());
        assert!(!ConfigError::EmptyResult("/x".to_string()).is_retryable());
        assert!(!ConfigError::NotInitialized.is_retryable());
        assert!(!ConfigError::RuntimeUnavailable("none".to_string()).is_retryable());
    }

    #[test]
    fn test_from_json_error() {
        let err: ConfigError = serde_json::from_str::<i32>("nope").unwrap_err().into();
        assert!(matches!(err, ConfigError::SerializationError(_)));
    }
}
