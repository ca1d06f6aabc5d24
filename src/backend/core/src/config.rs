//! Configuration management.
//!
//! Resolved once at start-up and handed to the pipeline as an explicit
//! dependency.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::permissions::RoleConfig;
use crate::telemetry::LogFormat;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream identity service
    pub identity_service: IdentityServiceConfig,

    /// Identity/profile cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Well-known role identifiers
    #[serde(default)]
    pub roles: RoleConfig,

    /// Event store
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityServiceConfig {
    /// Base URL of the identity service, e.g. `http://core:8084`
    pub base_url: String,

    /// Per-call timeout
    #[serde(default = "default_upstream_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Header carrying the caller's token on upstream calls
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Headers sent on every upstream call (service credentials and the like)
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    /// Display name used when the identity service omits the antenna name
    #[serde(default = "default_placeholder_antenna_name")]
    pub placeholder_antenna_name: String,
}

impl IdentityServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: default_upstream_timeout(),
            token_header: default_token_header(),
            extra_headers: HashMap::new(),
            placeholder_antenna_name: default_placeholder_antenna_name(),
        }
    }
}

/// Which key-value engine backs the cache.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Disable to send every request upstream
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Logical lifetime of a cached identity
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Background purge interval (memory backend)
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Upper bound on entries held in memory
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Redis connection URL (redis backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Also cache enriched profiles
    #[serde(default = "default_cache_profiles")]
    pub cache_profiles: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: CacheBackendKind::default(),
            ttl: default_cache_ttl(),
            sweep_interval: default_sweep_interval(),
            max_entries: default_max_entries(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            cache_profiles: default_cache_profiles(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the event store is in-memory when unset
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level / EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Port for the Prometheus exporter; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8084 }
fn default_upstream_timeout() -> Duration { Duration::from_secs(10) }
fn default_token_header() -> String { "X-Auth-Token".to_string() }
fn default_placeholder_antenna_name() -> String { "Unknown antenna".to_string() }
fn default_cache_enabled() -> bool { true }
fn default_cache_ttl() -> Duration { Duration::from_secs(300) }
fn default_sweep_interval() -> Duration { Duration::from_secs(60) }
fn default_max_entries() -> usize { 10_000 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "gatekeeper:".to_string() }
fn default_cache_profiles() -> bool { true }
fn default_max_connections() -> u32 { 10 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATEKEEPER").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GATEKEEPER").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.identity_service.base_url.trim().is_empty() {
            return Err(crate::GatekeeperError::configuration(
                "identity_service.base_url must not be empty",
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(crate::GatekeeperError::configuration(
                "cache.ttl must be greater than zero",
            ));
        }
        Ok(())
    }
}
