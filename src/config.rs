//! Engine configuration and store address parsing.
//!
//! A single address string of the form `user:password@host1,host2/path`
//! names the store endpoints, optional credentials and the namespace path.

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Environment variable holding the store address.
pub const ADDR_ENV: &str = "CONFIG_ADDR";

/// Environment variable overriding the per-request timeout, in milliseconds.
pub const TIMEOUT_ENV: &str = "CONFIG_TIMEOUT_MS";

/// Parsed store address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dsn {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Namespace path, always ending with `/`.
    pub path: String,
}

impl Dsn {
    /// Parse `[user:password@]host[,host...][/path]`.
    ///
    /// The password may itself contain `:` and `@`; the last `@` ends the
    /// credentials.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || ConfigError::InvalidAddress(address.to_string());

        let (credentials, rest) = match address.rsplit_once('@') {
            Some((creds, rest)) => (Some(creds), rest),
            None => (None, address),
        };
        let (username, password) = match credentials {
            None | Some("") => (None, None),
            Some(creds) => {
                let (user, pass) = creds.split_once(':').ok_or_else(invalid)?;
                (Some(user.to_string()), Some(pass.to_string()))
            }
        };

        let (hosts, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let endpoints: Vec<String> = hosts
            .split(',')
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if endpoints.is_empty() {
            return Err(invalid());
        }

        let mut path = if path.is_empty() { "/".to_string() } else { path.to_string() };
        if !path.ends_with('/') {
            path.push('/');
        }

        Ok(Self {
            endpoints,
            username,
            password,
            path,
        })
    }
}

/// Settings for a [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Store address; its path seeds the namespace.
    pub address: Option<String>,
    /// Deadline for every store round trip (default: 1 second).
    pub request_timeout: Duration,
    /// Prefix the dispatcher watches (default: `/`).
    pub watch_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: None,
            request_timeout: Duration::from_secs(1),
            watch_prefix: "/".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read [`ADDR_ENV`] and [`TIMEOUT_ENV`].
    ///
    /// Returns `None` when no address is configured, in which case the engine
    /// should not be initialized.
    pub fn from_env() -> Option<Self> {
        let address = std::env::var(ADDR_ENV).ok().filter(|a| !a.is_empty())?;
        let mut config = Self {
            address: Some(address),
            ..Self::default()
        };
        if let Some(ms) = std::env::var(TIMEOUT_ENV).ok().and_then(|v| v.parse().ok()) {
            config.request_timeout = Duration::from_millis(ms);
        }
        Some(config)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_watch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.watch_prefix = prefix.into();
        self
    }

    /// Parsed address, if one is configured.
    pub fn dsn(&self) -> Result<Option<Dsn>> {
        self.address.as_deref().map(Dsn::parse).transpose()
    }
}
