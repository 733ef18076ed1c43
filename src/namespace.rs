//! Namespace resolution for relative configuration paths.
//!
//! The namespace is a set-once sequence of path segments, usually taken from
//! the path of the store address. Relative keys are resolved by prepending
//! the first `level` segments.

use std::sync::OnceLock;

use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::key::{KeyPath, DELIMITER};

/// Process namespace; the first successful [`Namespace::set`] wins.
#[derive(Debug, Default)]
pub struct Namespace {
    segments: OnceLock<Vec<String>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace from a path such as `/call/smart_after_sale/`.
    ///
    /// Returns false, leaving the namespace unchanged, if it was already set.
    pub fn set(&self, path: &str) -> bool {
        let segments: Vec<String> = path
            .split(DELIMITER)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        match self.segments.set(segments) {
            Ok(()) => {
                info!(namespace = %path, "namespace set");
                true
            }
            Err(rejected) => {
                warn!(
                    current = ?self.segments(),
                    rejected = ?rejected,
                    "namespace already set, ignoring"
                );
                false
            }
        }
    }

    /// Segments of the namespace, empty while unset.
    pub fn segments(&self) -> &[String] {
        self.segments.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Resolve `key` against the first `level` namespace segments.
    ///
    /// Level 0 takes `key` as absolute.
    ///
    /// # Panics
    ///
    /// Requesting level 1 from an empty namespace is treated as a caller bug
    /// and panics. Deeper overflows return
    /// [`ConfigError::InvalidNamespaceLevel`].
    pub fn resolve(&self, key: &str, level: usize) -> Result<KeyPath> {
        let segments = self.segments();
        if level > segments.len() {
            if level == 1 {
                panic!("namespace level 1 requested for key {key:?} but no namespace is set");
            }
            return Err(ConfigError::InvalidNamespaceLevel {
                requested: level,
                available: segments.len(),
            });
        }
        if level == 0 {
            return KeyPath::normalize(key);
        }

        let base = KeyPath::normalize(&segments[..level].join("/"))?;
        base.join(key)
    }
}
