//! Key paths: validation and normalization of namespace paths.
//!
//! A key path always starts with `/`, never ends with `/` (the root `/` being
//! the only exception) and never contains an empty segment.

use std::fmt;

use crate::error::{ConfigError, Result};

/// Path segment delimiter.
pub const DELIMITER: char = '/';

/// A validated, absolute key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(String);

impl KeyPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self(DELIMITER.to_string())
    }

    /// Normalize a user-supplied key into a key path.
    ///
    /// Prepends the delimiter if absent and strips one trailing delimiter.
    /// Keys containing an empty segment (`//`) are rejected.
    pub fn normalize(key: &str) -> Result<Self> {
        let mut path = if key.starts_with(DELIMITER) {
            key.to_string()
        } else {
            format!("{DELIMITER}{key}")
        };
        if path.contains("//") {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }
        if path.len() > 1 && path.ends_with(DELIMITER) {
            path.pop();
        }
        Ok(Self(path))
    }

    /// Strict validity check for keys coming back from the store.
    ///
    /// Unlike [`KeyPath::normalize`] nothing is repaired, and the root is not
    /// a valid data key.
    pub fn is_valid(key: &str) -> bool {
        key.starts_with(DELIMITER) && !key.ends_with(DELIMITER) && !key.contains("//")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Path segments, without the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER).filter(|s| !s.is_empty())
    }

    /// Prefix to scan for every key strictly below this path.
    pub fn scan_prefix(&self) -> String {
        if self.is_root() {
            self.0.clone()
        } else {
            format!("{}{DELIMITER}", self.0)
        }
    }

    /// Every path from the root down to this one, inclusive.
    ///
    /// `/a/b` yields `/`, `/a`, `/a/b`.
    pub fn ancestors(&self) -> Vec<KeyPath> {
        let mut out = vec![KeyPath::root()];
        let mut current = String::new();
        for segment in self.segments() {
            current.push(DELIMITER);
            current.push_str(segment);
            out.push(KeyPath(current.clone()));
        }
        out
    }

    /// Append a relative key below this path.
    pub fn join(&self, relative: &str) -> Result<KeyPath> {
        let relative = relative.trim_start_matches(DELIMITER);
        if relative.is_empty() {
            return Ok(self.clone());
        }
        KeyPath::normalize(&format!("{}{relative}", self.scan_prefix()))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_valid() {
        assert_eq!(KeyPath::normalize("/call/redis").unwrap().as_str(), "/call/redis");
        assert_eq!(KeyPath::normalize("call/redis").unwrap().as_str(), "/call/redis");
        assert_eq!(KeyPath::normalize("/call/redis/").unwrap().as_str(), "/call/redis");
        assert_eq!(KeyPath::normalize("/").unwrap().as_str(), "/");
        assert_eq!(KeyPath::normalize("").unwrap().as_str(), "/");
    }

    #[test]
    fn test_normalize_rejects_empty_segments() {
        for key in ["//", "/call//redis", "/call/redis//", "call//"] {
            let err = KeyPath::normalize(key).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidKey(_)), "{key}");
        }
    }

    #[test]
    fn test_is_valid() {
        assert!(KeyPath::is_valid("/call"));
        assert!(KeyPath::is_valid("/call/redis/timeout"));
        assert!(!KeyPath::is_valid("/"));
        assert!(!KeyPath::is_valid("call"));
        assert!(!KeyPath::is_valid("/call/"));
        assert!(!KeyPath::is_valid("/call//redis"));
    }

    #[test]
    fn test_scan_prefix() {
        assert_eq!(KeyPath::root().scan_prefix(), "/");
        assert_eq!(KeyPath::normalize("/call").unwrap().scan_prefix(), "/call/");
    }

    #[test]
    fn test_ancestors() {
        let key = KeyPath::normalize("/call/redis/timeout").unwrap();
        let ancestors: Vec<String> = key.ancestors().iter().map(|k| k.to_string()).collect();
        assert_eq!(ancestors, vec!["/", "/call", "/call/redis", "/call/redis/timeout"]);
        assert_eq!(KeyPath::root().ancestors(), vec![KeyPath::root()]);
    }

    #[test]
    fn test_join() {
        let base = KeyPath::normalize("/finance").unwrap();
        assert_eq!(base.join("email").unwrap().as_str(), "/finance/email");
        assert_eq!(base.join("/email/").unwrap().as_str(), "/finance/email");
        assert_eq!(base.join("").unwrap(), base);
        assert_eq!(KeyPath::root().join("call").unwrap().as_str(), "/call");
        assert!(base.join("a//b").is_err());
    }
}
