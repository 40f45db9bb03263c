// src/config.rs

//! Manages server configuration: loading, validation, and defaults.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration for TLS termination.
///
/// The trust chain (`client_ca_path`) is used to verify client certificates.
/// When `local_dev` is set, self-signed leaf certificates are admitted so a
/// local front-end can talk to the server without a real PKI.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Trust chain for verifying client certificates. `None` disables
    /// client-certificate verification entirely.
    #[serde(default)]
    pub client_ca_path: Option<String>,
    #[serde(default)]
    pub local_dev: bool,
}

fn default_tls_enabled() -> bool {
    true
}
fn default_cert_path() -> String {
    "glossd.crt".to_string()
}
fn default_key_path() -> String {
    "glossd.key".to_string()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tls_enabled(),
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            client_ca_path: None,
            local_dev: false,
        }
    }
}

/// Connection parameters for the relational database backing the service.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub database: String,
    /// Number of pooled connections. Fixed for the lifetime of the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_username() -> String {
    "glossd".to_string()
}
fn default_db_name() -> String {
    "glossd".to_string()
}
fn default_pool_size() -> usize {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            username: default_db_username(),
            password: String::new(),
            database: default_db_name(),
            pool_size: default_pool_size(),
        }
    }
}

/// Endpoint of the key-value cache holding session records.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_host")]
    pub host: String,
    #[serde(default = "default_cache_port")]
    pub port: u16,
}

fn default_cache_host() -> String {
    "127.0.0.1".to_string()
}
fn default_cache_port() -> u16 {
    6379
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: default_cache_host(),
            port: default_cache_port(),
        }
    }
}

/// Session-signing and session-lifetime settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    /// Server secret used to HMAC-sign session ids. Must be set; the server
    /// refuses to start without it.
    #[serde(default)]
    pub secret_key: String,
    /// How long an issued session stays valid.
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(86_400)
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            session_ttl: default_session_ttl(),
        }
    }
}

/// Per-phase I/O deadlines for a connection session. Expiry of any of these
/// force-closes the transport; there is no separate cancellation mechanism.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake: Duration,
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read: Duration,
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write: Duration,
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake: default_handshake_timeout(),
            read: default_read_timeout(),
            write: default_write_timeout(),
        }
    }
}

/// Settings consumed by the built-in handler units.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HandlerConfig {
    /// Tables `/last_modified` may be asked about. Anything else is refused.
    #[serde(default = "default_allowed_tables")]
    pub last_modified_tables: Vec<String>,
    /// Minimum spacing between `/last_modified` requests per client IP.
    #[serde(default = "default_last_modified_window", with = "humantime_serde")]
    pub last_modified_window: Duration,
    #[serde(default)]
    pub discord: DiscordConfig,
}

fn default_allowed_tables() -> Vec<String> {
    vec!["texts".to_string(), "annotations".to_string()]
}
fn default_last_modified_window() -> Duration {
    Duration::from_secs(1)
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            last_modified_tables: default_allowed_tables(),
            last_modified_window: default_last_modified_window(),
            discord: DiscordConfig::default(),
        }
    }
}

/// OAuth application credentials for the Discord login exchange.
/// All fields empty means Discord login is disabled.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
}

impl DiscordConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub handlers: HandlerConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8443
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            tls: TlsConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
            timeouts: TimeoutConfig::default(),
            handlers: HandlerConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates invariants the serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret_key.is_empty() {
            return Err(anyhow!(
                "auth.secret_key must be set; sessions cannot be signed without it"
            ));
        }
        if self.database.pool_size == 0 {
            return Err(anyhow!("database.pool_size must be at least 1"));
        }
        if self.auth.session_ttl.as_secs() == 0 {
            return Err(anyhow!("auth.session_ttl must be non-zero"));
        }
        Ok(())
    }
}
