//! Configuration module for zipserve.
//!
//! Values are layered: defaults, then an optional TOML file, then
//! `ZIPSERVE_*` environment variables. The binary applies its own flags last.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "zipserve.toml";

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "ZIPSERVE_";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// The address to bind the HTTP listener to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

/// Archive configuration: where files come from and how bundles are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveConfig {
    /// Directory requested names are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Seconds a built archive stays in the cache (default: 60).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Deflate level, 0-9 (default: 5).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Reject names that are absolute or climb out of `root` with `..`.
    #[serde(default = "default_true")]
    pub confine_to_root: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("./Files")
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_compression_level() -> u32 {
    crate::archive::DEFAULT_COMPRESSION_LEVEL
}

fn default_true() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            cache_ttl_secs: default_cache_ttl_secs(),
            compression_level: default_compression_level(),
            confine_to_root: true,
        }
    }
}

impl ArchiveConfig {
    /// Get the cache TTL as a Duration.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Worker pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Number of async worker threads (the floor).
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound on the total thread count (the ceiling). Threads beyond
    /// `min_workers` are used for blocking file reads.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_min_workers() -> usize {
    8
}

fn default_max_workers() -> usize {
    16
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min_workers: default_min_workers(), max_workers: default_max_workers() }
    }
}

/// Root configuration for zipserve.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Archive configuration.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Worker pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from the environment and an optional file.
    ///
    /// An explicit `path` must exist. Without one, `./zipserve.toml` is read
    /// when present and defaults are used otherwise. `ZIPSERVE_*` variables
    /// are applied on top and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() { Self::load_from_file(&local)? } else { Self::default() }
            }
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ZIPSERVE_*` overrides from the given variables.
    ///
    /// Unrelated variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "PORT" => self.server.address.set_port(parse_var(&key, &value)?),
                "ROOT" => self.archive.root = PathBuf::from(value),
                "CACHE_TTL_SECS" => self.archive.cache_ttl_secs = parse_var(&key, &value)?,
                "MIN_WORKERS" => self.pool.min_workers = parse_var(&key, &value)?,
                "MAX_WORKERS" => self.pool.max_workers = parse_var(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "archive.cache_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.archive.compression_level > 9 {
            return Err(ConfigError::InvalidValue(format!(
                "archive.compression_level must be between 0 and 9, got {}",
                self.archive.compression_level
            )));
        }

        if self.pool.min_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "pool.min_workers must be greater than 0".to_string(),
            ));
        }

        if self.pool.min_workers > self.pool.max_workers {
            return Err(ConfigError::InvalidValue(format!(
                "pool.min_workers ({}) exceeds pool.max_workers ({})",
                self.pool.min_workers, self.pool.max_workers
            )));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue(format!("{key}={value}")))
}
