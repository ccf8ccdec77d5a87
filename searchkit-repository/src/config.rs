//! Connection and repository configuration.
//!
//! Both configuration types can be built in code, read from `SEARCHKIT_*`
//! environment variables, or deserialized from TOML.

use crate::error::{RepositoryError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "SEARCHKIT";

/// OpenSearch connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSearchConfig {
    /// OpenSearch URL(s). Only the first is used for the single-node pool.
    pub urls: Vec<String>,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Request timeout.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Ignore system proxy settings.
    pub disable_proxy: bool,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self::new("http://localhost:9200")
    }
}

impl OpenSearchConfig {
    /// Create a new configuration with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
            tls: None,
            disable_proxy: true,
        }
    }

    /// Set basic authentication credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set TLS configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Honour system proxy settings.
    pub fn with_system_proxy(mut self) -> Self {
        self.disable_proxy = false;
        self
    }

    /// Read `<PREFIX>_URLS` (comma separated), `<PREFIX>_USERNAME`,
    /// `<PREFIX>_PASSWORD` and `<PREFIX>_REQUEST_TIMEOUT_MS`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(&EnvVars::from_process(prefix))
    }

    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| RepositoryError::Config(e.to_string()))
    }

    pub(crate) fn from_lookup(vars: &EnvVars) -> Result<Self> {
        let mut config = Self::default();

        if let Some(urls) = vars.get("URLS") {
            config.urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }
        config.username = vars.get("USERNAME");
        config.password = vars.get("PASSWORD");
        if let Some(ms) = vars.parse::<u64>("REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can produce a client.
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(RepositoryError::Config("No URLs provided".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(RepositoryError::Config(
                "Basic auth needs both a username and a password".to_string(),
            ));
        }
        Ok(())
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to a PEM CA certificate used to validate the server.
    pub ca_cert: Option<String>,
    /// Skip certificate verification (not recommended for production).
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create TLS config with CA certificate.
    pub fn with_ca_cert(ca_cert: impl Into<String>) -> Self {
        Self {
            ca_cert: Some(ca_cert.into()),
            ..Default::default()
        }
    }

    /// Skip certificate verification (DANGER: only for development).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }
}

/// When a repository may make writes visible to search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// `refresh()` is rejected and writes never request a refresh.
    #[default]
    Disabled,
    /// `refresh()` may be called explicitly.
    Manual,
    /// Writes wait for the next refresh; `refresh()` is allowed too.
    WaitFor,
}

impl RefreshPolicy {
    /// Whether explicit `refresh()` calls are permitted.
    pub fn allows_refresh(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Whether writes ask the store to wait for a refresh.
    pub fn refresh_on_write(&self) -> bool {
        matches!(self, Self::WaitFor)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "false" => Some(Self::Disabled),
            "manual" | "true" => Some(Self::Manual),
            "wait_for" | "wait-for" => Some(Self::WaitFor),
            _ => None,
        }
    }
}

/// Flush thresholds of a bulk session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Flush once this many operations are buffered.
    pub max_actions: usize,
    /// Flush once the estimated request body reaches this many bytes.
    pub max_bytes: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_actions: 500,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl BulkConfig {
    /// Set the action threshold.
    pub fn with_max_actions(mut self, max_actions: usize) -> Self {
        self.max_actions = max_actions;
        self
    }

    /// Set the byte threshold.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Configuration of a repository bound to one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Index the repository reads and writes.
    pub index: String,
    /// Refresh policy. Defaults to [`RefreshPolicy::Disabled`].
    #[serde(default)]
    pub refresh: RefreshPolicy,
    /// Conflict retry policy used by `update_with`.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Bulk flush thresholds.
    #[serde(default)]
    pub bulk: BulkConfig,
    /// How long the server keeps a scroll cursor alive between pages.
    #[serde(default = "default_keep_alive", with = "duration_ms")]
    pub scroll_keep_alive: Duration,
    /// Page size used by scrolls that do not set one.
    #[serde(default = "default_page_size")]
    pub scroll_page_size: usize,
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_page_size() -> usize {
    100
}

impl RepositoryConfig {
    /// Create a configuration for an index with default settings.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            refresh: RefreshPolicy::default(),
            retry: RetryPolicy::default(),
            bulk: BulkConfig::default(),
            scroll_keep_alive: default_keep_alive(),
            scroll_page_size: default_page_size(),
        }
    }

    /// Set the refresh policy.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set the conflict retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set bulk thresholds.
    pub fn with_bulk(mut self, bulk: BulkConfig) -> Self {
        self.bulk = bulk;
        self
    }

    /// Set scroll keep-alive.
    pub fn with_scroll_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.scroll_keep_alive = keep_alive;
        self
    }

    /// Set default scroll page size.
    pub fn with_scroll_page_size(mut self, size: usize) -> Self {
        self.scroll_page_size = size;
        self
    }

    /// Read `<PREFIX>_INDEX` (required), `<PREFIX>_REFRESH_POLICY`,
    /// `<PREFIX>_UPDATE_MAX_RETRIES`, `<PREFIX>_BULK_MAX_ACTIONS`,
    /// `<PREFIX>_BULK_MAX_BYTES`, `<PREFIX>_SCROLL_KEEP_ALIVE_MS` and
    /// `<PREFIX>_SCROLL_PAGE_SIZE`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(&EnvVars::from_process(prefix))
    }

    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| RepositoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_lookup(vars: &EnvVars) -> Result<Self> {
        let index = vars
            .get("INDEX")
            .ok_or_else(|| RepositoryError::Config(format!("{} is not set", vars.key("INDEX"))))?;
        let mut config = Self::new(index);

        if let Some(policy) = vars.get("REFRESH_POLICY") {
            config.refresh = RefreshPolicy::parse(&policy).ok_or_else(|| {
                RepositoryError::Config(format!("Unknown refresh policy: {}", policy))
            })?;
        }
        if let Some(retries) = vars.parse("UPDATE_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(actions) = vars.parse("BULK_MAX_ACTIONS")? {
            config.bulk.max_actions = actions;
        }
        if let Some(bytes) = vars.parse("BULK_MAX_BYTES")? {
            config.bulk.max_bytes = bytes;
        }
        if let Some(ms) = vars.parse::<u64>("SCROLL_KEEP_ALIVE_MS")? {
            config.scroll_keep_alive = Duration::from_millis(ms);
        }
        if let Some(size) = vars.parse("SCROLL_PAGE_SIZE")? {
            config.scroll_page_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the repository relies on.
    pub fn validate(&self) -> Result<()> {
        if self.index.trim().is_empty() {
            return Err(RepositoryError::Config("Index name is empty".to_string()));
        }
        if self.bulk.max_actions == 0 || self.bulk.max_bytes == 0 {
            return Err(RepositoryError::Config(
                "Bulk thresholds must be positive".to_string(),
            ));
        }
        if self.scroll_page_size == 0 {
            return Err(RepositoryError::Config(
                "Scroll page size must be positive".to_string(),
            ));
        }
        if self.scroll_keep_alive < Duration::from_millis(1) {
            return Err(RepositoryError::Config(
                "Scroll keep-alive must be at least one millisecond".to_string(),
            ));
        }
        Ok(())
    }
}

/// Prefixed view over a set of environment variables.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvVars {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvVars {
    pub(crate) fn new(prefix: &str, vars: HashMap<String, String>) -> Self {
        Self {
            prefix: prefix.trim_end_matches('_').to_string(),
            vars,
        }
    }

    fn from_process(prefix: &str) -> Self {
        Self::new(prefix, std::env::vars().collect())
    }

    fn key(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<String> {
        self.vars
            .get(&self.key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                RepositoryError::Config(format!("Invalid value for {}: {}", self.key(name), raw))
            }),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
