//! Service configuration.
//!
//! Loaded from a TOML file (path in `LEDGER_CONFIG`, default `ledger.toml`;
//! a missing file means defaults), then overridden by environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `BIND_ADDR` | `server.bind_addr` |
//! | `PORT` | port of `server.bind_addr` |
//! | `IPFS_URL` | `content_store.url` |
//! | `SUPABASE_URL` | `index_store.url` |
//! | `SUPABASE_ANON_KEY` | `index_store.api_key` |
//! | `LEDGER_DATA_DIR` | `chain.data_dir` |
//!
//! Durations are integers: `*_ms` keys in milliseconds, `*_secs` in seconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub content_store: ContentStoreConfig,
    #[serde(default)]
    pub index_store: IndexStoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStoreKind {
    #[default]
    Ipfs,
    Memory,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentStoreConfig {
    #[serde(default)]
    pub kind: ContentStoreKind,
    /// IPFS HTTP API base URL.
    #[serde(default = "default_ipfs_url")]
    pub url: String,
    /// Upper bound for a single put/get, enforced by the ledger core.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStoreKind {
    #[default]
    Supabase,
    Memory,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexStoreConfig {
    #[serde(default)]
    pub kind: IndexStoreKind,
    /// Project URL; rows live under `<url>/rest/v1/<table>`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    /// Rows requested per page when listing. Keep at or below the server's
    /// `max-rows` so a short page reliably marks the end.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Column used to order listings; empty leaves order to the server.
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Client-side retry policy for transient failures.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_backoff_ms", default = "default_initial_backoff")]
    pub initial_backoff: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_backoff_ms", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

/// What a query does when one payload cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Fail the whole query.
    #[default]
    FailFast,
    /// Log the failure and leave the record out.
    SkipUnreadable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Maximum concurrent payload fetches per query.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    #[serde(default)]
    pub fetch_policy: FetchPolicy,
}

#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Block journal directory. No journal when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Run `verify()` in the background at this interval.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "verify_interval_secs", default)]
    pub verify_interval: Option<Duration>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_ipfs_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_table() -> String {
    "ledger".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_order_by() -> String {
    "id".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_fan_out() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            kind: ContentStoreKind::default(),
            url: default_ipfs_url(),
            timeout: default_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        Self {
            kind: IndexStoreKind::default(),
            url: String::new(),
            api_key: String::new(),
            table: default_table(),
            page_size: default_page_size(),
            order_by: default_order_by(),
            timeout: default_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { fan_out: default_fan_out(), fetch_policy: FetchPolicy::default() }
    }
}

impl LedgerConfig {
    /// Load from `LEDGER_CONFIG` (or `ledger.toml`), apply environment
    /// overrides, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("LEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr.parse().map_err(|e| ConfigError::Invalid {
                field: "server.bind_addr",
                reason: format!("{addr}: {e}"),
            })?;
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = port.parse().map_err(|e| ConfigError::Invalid {
                field: "server.bind_addr",
                reason: format!("PORT={port}: {e}"),
            })?;
            self.server.bind_addr.set_port(port);
        }
        if let Some(url) = lookup("IPFS_URL") {
            self.content_store.url = url;
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.index_store.url = url;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY") {
            self.index_store.api_key = key;
        }
        if let Some(dir) = lookup("LEDGER_DATA_DIR") {
            self.chain.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.fan_out == 0 {
            return Err(invalid("query.fan_out", "must be at least 1"));
        }
        if self.content_store.timeout.is_zero() {
            return Err(invalid("content_store.timeout_ms", "must be non-zero"));
        }
        if self.index_store.timeout.is_zero() {
            return Err(invalid("index_store.timeout_ms", "must be non-zero"));
        }
        if self.index_store.page_size == 0 {
            return Err(invalid("index_store.page_size", "must be at least 1"));
        }
        let ipfs = self.content_store.kind == ContentStoreKind::Ipfs;
        if ipfs && self.content_store.url.trim().is_empty() {
            return Err(invalid("content_store.url", "required for the ipfs store"));
        }
        if self.index_store.kind == IndexStoreKind::Supabase {
            if self.index_store.url.trim().is_empty() {
                return Err(invalid("index_store.url", "required for the supabase store"));
            }
            if self.index_store.api_key.trim().is_empty() {
                return Err(invalid("index_store.api_key", "required for the supabase store"));
            }
        }
        if self.chain.verify_interval.is_some_and(|d| d.is_zero()) {
            return Err(invalid("chain.verify_interval_secs", "must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn memory_config() -> LedgerConfig {
        let mut config = LedgerConfig::default();
        config.content_store.kind = ContentStoreKind::Memory;
        config.index_store.kind = IndexStoreKind::Memory;
        config
    }

    #[test]
    fn defaults_match_the_local_node_setup() {
        let config = LedgerConfig::default();
        assert_eq!(config.server.bind_addr.port(), 3000);
        assert_eq!(config.content_store.url, "http://localhost:5001");
        assert_eq!(config.index_store.table, "ledger");
        assert_eq!(config.index_store.page_size, 1000);
        assert_eq!(config.index_store.order_by, "id");
        assert_eq!(config.query.fetch_policy, FetchPolicy::FailFast);
        assert!(config.chain.data_dir.is_none());
    }

    #[test]
    fn parses_toml_with_integer_durations() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [content_store]
            kind = "memory"
            timeout_ms = 2000

            [index_store]
            kind = "memory"
            retry = { max_retries = 5, initial_backoff_ms = 50, max_backoff_ms = 1000 }

            [query]
            fan_out = 4
            fetch_policy = "skip_unreadable"

            [chain]
            data_dir = "/var/lib/ledger"
            verify_interval_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.content_store.timeout, Duration::from_secs(2));
        assert_eq!(config.index_store.retry.max_retries, 5);
        assert_eq!(config.index_store.retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(config.query.fan_out, 4);
        assert_eq!(config.query.fetch_policy, FetchPolicy::SkipUnreadable);
        assert_eq!(config.chain.verify_interval, Some(Duration::from_secs(300)));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<LedgerConfig>("[query]\nfanout = 3\n").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "8080"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("LEDGER_DATA_DIR", "/tmp/ledger"),
        ]);
        let mut config = LedgerConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.index_store.url, "https://project.supabase.co");
        assert_eq!(config.chain.data_dir, Some(PathBuf::from("/tmp/ledger")));
        config.validate().unwrap();
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let mut config = LedgerConfig::default();
        let err = config.apply_env(|k| (k == "PORT").then(|| "http".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "server.bind_addr", .. }));
    }

    #[test]
    fn validation_catches_unusable_settings() {
        let mut config = memory_config();
        config.query.fan_out = 0;
        assert!(config.validate().is_err());

        let mut config = memory_config();
        config.index_store.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "index_store.page_size", .. })
        ));

        // supabase without credentials
        let config = LedgerConfig { index_store: IndexStoreConfig::default(), ..memory_config() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "index_store.url", .. })
        ));

        memory_config().validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.query.fan_out, 8);
    }
}
