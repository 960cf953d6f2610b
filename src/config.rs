// src/config.rs

//! Manages proxy configuration: loading, resolving named sections, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::time::Duration;
use url::Url;

/// The name used for the cache and origin sections when none is given.
pub const DEFAULT_NAME: &str = "default";

/// Identifies the storage backend behind a named cache.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Memory => f.write_str("memory"),
        }
    }
}

/// Settings for the cache index and its periodic reaper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheIndexConfig {
    /// How often the reaper sweeps the index. `0s` disables the periodic sweep.
    #[serde(with = "humantime_serde", default = "default_reap_interval")]
    pub reap_interval: Duration,
    /// Total payload bytes allowed before size-based eviction. `0` disables the limit.
    #[serde(default)]
    pub max_size_bytes: u64,
    /// How far below `max_size_bytes` an eviction pass drives usage.
    #[serde(default)]
    pub max_size_backoff_bytes: u64,
    /// Number of objects allowed before size-based eviction. `0` disables the limit.
    #[serde(default)]
    pub max_size_objects: u64,
    /// How far below `max_size_objects` an eviction pass drives the object count.
    #[serde(default)]
    pub max_size_backoff_objects: u64,
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(3)
}

impl Default for CacheIndexConfig {
    fn default() -> Self {
        Self {
            reap_interval: default_reap_interval(),
            max_size_bytes: 0,
            max_size_backoff_bytes: 0,
            max_size_objects: 0,
            max_size_backoff_objects: 0,
        }
    }
}

/// Configuration for a single named cache.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CachingConfig {
    /// Filled in from the section key when the file is loaded.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub cache_type: CacheType,
    #[serde(default)]
    pub index: CacheIndexConfig,
}

impl CachingConfig {
    /// A memory cache with the given reap interval, mostly useful in tests.
    pub fn memory(name: &str, reap_interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            cache_type: CacheType::Memory,
            index: CacheIndexConfig {
                reap_interval,
                ..CacheIndexConfig::default()
            },
        }
    }
}

/// Configuration for one upstream time-series origin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    /// Filled in from the section key when the file is loaded.
    #[serde(skip)]
    pub name: String,
    pub origin_url: String,
    /// Upstream path that serves time range queries.
    #[serde(default = "default_timeseries_path")]
    pub timeseries_path: String,
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    /// Applies to each individual upstream fetch.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_timeseries_ttl")]
    pub timeseries_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_object_ttl")]
    pub object_ttl: Duration,
    /// Number of steps kept per cached series. `0` keeps everything.
    #[serde(default = "default_retention_factor")]
    pub timeseries_retention_factor: u64,
    #[serde(default)]
    pub fast_forward_disable: bool,
    #[serde(default = "default_dash")]
    pub health_check_upstream_path: String,
    #[serde(default = "default_dash")]
    pub health_check_verb: String,
    #[serde(default = "default_dash")]
    pub health_check_query: String,
    /// Header rewrite rules applied to upstream requests (`+name` appends, `-name` removes).
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
}

fn default_timeseries_path() -> String {
    "/extension/lua/caql_v1".to_string()
}
fn default_cache_name() -> String {
    DEFAULT_NAME.to_string()
}
fn default_timeout() -> Duration {
    Duration::from_secs(180)
}
fn default_timeseries_ttl() -> Duration {
    Duration::from_secs(6 * 3600)
}
fn default_object_ttl() -> Duration {
    Duration::from_secs(30)
}
fn default_retention_factor() -> u64 {
    1024
}
fn default_dash() -> String {
    "-".to_string()
}

impl OriginConfig {
    /// An origin with default tuning pointed at `origin_url`.
    pub fn new(name: &str, origin_url: &str) -> Self {
        Self {
            name: name.to_string(),
            origin_url: origin_url.to_string(),
            timeseries_path: default_timeseries_path(),
            cache_name: default_cache_name(),
            timeout: default_timeout(),
            timeseries_ttl: default_timeseries_ttl(),
            object_ttl: default_object_ttl(),
            timeseries_retention_factor: default_retention_factor(),
            fast_forward_disable: false,
            health_check_upstream_path: default_dash(),
            health_check_verb: default_dash(),
            health_check_query: default_dash(),
            request_headers: HashMap::new(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8481
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// Application identity used in proxy and diagnostic headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for AppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Represents the final, validated, and resolved proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_caches")]
    pub caches: HashMap<String, CachingConfig>,
    #[serde(default)]
    pub origins: HashMap<String, OriginConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8480
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_app_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_caches() -> HashMap<String, CachingConfig> {
    let mut caches = HashMap::new();
    caches.insert(
        DEFAULT_NAME.to_string(),
        CachingConfig {
            name: DEFAULT_NAME.to_string(),
            ..CachingConfig::default()
        },
    );
    caches
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            app_name: default_app_name(),
            caches: default_caches(),
            origins: HashMap::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads, resolves, and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration text, fills in section names, and validates the result.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;
        config.resolve_names();
        config.validate()?;
        Ok(config)
    }

    fn resolve_names(&mut self) {
        for (name, cache) in self.caches.iter_mut() {
            cache.name = name.clone();
        }
        for (name, origin) in self.origins.iter_mut() {
            origin.name = name.clone();
        }
    }

    /// Checks cross-section references and numeric limits.
    pub fn validate(&self) -> Result<()> {
        for (name, cache) in &self.caches {
            let index = &cache.index;
            if index.max_size_bytes > 0 && index.max_size_backoff_bytes >= index.max_size_bytes {
                return Err(anyhow!(
                    "cache '{name}': max_size_backoff_bytes must be smaller than max_size_bytes"
                ));
            }
            if index.max_size_objects > 0
                && index.max_size_backoff_objects >= index.max_size_objects
            {
                return Err(anyhow!(
                    "cache '{name}': max_size_backoff_objects must be smaller than max_size_objects"
                ));
            }
        }

        for (name, origin) in &self.origins {
            Url::parse(&origin.origin_url).with_context(|| {
                format!("origin '{name}': invalid origin_url '{}'", origin.origin_url)
            })?;
            if !self.caches.contains_key(&origin.cache_name) {
                return Err(anyhow!(
                    "origin '{name}' references unknown cache '{}'",
                    origin.cache_name
                ));
            }
            if origin.timeout.is_zero() {
                return Err(anyhow!("origin '{name}': timeout must be greater than zero"));
            }
        }

        Ok(())
    }

    /// Builds the application identity from the configured name and crate version.
    pub fn app_info(&self) -> AppInfo {
        AppInfo::new(self.app_name.clone(), env!("CARGO_PKG_VERSION"))
    }
}
