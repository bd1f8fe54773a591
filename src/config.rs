//! Configuration for embedcache

use crate::backend::BackendKind;
use crate::error::{CacheError, Result};
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub metrics: MetricsConfig,
}

/// Cache client configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Comma-separated `host[:port[:weight]]` list
    pub servers: String,

    /// Comma-separated `FLAG[:VALUE]` list applied after load
    pub behavior: String,

    /// Which backend implementation to run
    pub backend: BackendKind,

    /// Drain buffered writes at transaction pre-commit
    pub flush_on_commit: bool,

    /// SASL credentials, used only when both are non-empty
    pub sasl_username: String,
    pub sasl_password: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: String::new(),
            behavior: String::new(),
            backend: BackendKind::default(),
            flush_on_commit: true,
            sasl_username: String::new(),
            sasl_password: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.sasl_username.is_empty() || self.sasl_password.is_empty() {
            None
        } else {
            Some((&self.sasl_username, &self.sasl_password))
        }
    }
}

// Keep the password out of logs
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("servers", &self.servers)
            .field("behavior", &self.behavior)
            .field("backend", &self.backend)
            .field("flush_on_commit", &self.flush_on_commit)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &if self.sasl_password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| CacheError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(servers) = var("EMBEDCACHE_SERVERS") {
            config.client.servers = servers;
        }

        if let Some(behavior) = var("EMBEDCACHE_BEHAVIOR") {
            config.client.behavior = behavior;
        }

        if let Some(backend) = var("EMBEDCACHE_BACKEND") {
            config.client.backend = BackendKind::from_name(&backend)
                .ok_or_else(|| CacheError::Config(format!("Unknown backend: {backend}")))?;
        }

        if let Some(flush) = var("EMBEDCACHE_FLUSH_ON_COMMIT") {
            config.client.flush_on_commit = parse_bool(&flush);
        }

        if let Some(username) = var("EMBEDCACHE_SASL_USERNAME") {
            config.client.sasl_username = username;
        }

        if let Some(password) = var("EMBEDCACHE_SASL_PASSWORD") {
            config.client.sasl_password = password;
        }

        if let Some(enabled) = var("EMBEDCACHE_METRICS_ENABLED") {
            config.metrics.enabled = parse_bool(&enabled);
        }

        Ok(config)
    }
}
