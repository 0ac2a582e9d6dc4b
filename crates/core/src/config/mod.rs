//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HOARD_*)
//! 2. TOML config file (if HOARD_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::projector::PackagedLocation;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HOARD_*)
/// 2. TOML config file (if HOARD_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory that holds the cache's metadata database and file tree.
    ///
    /// Set via HOARD_ROOT environment variable.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Cache name. Files live under `<root>/<name>/`, metadata in
    /// `<root>/<name>.sqlite`.
    ///
    /// Set via HOARD_NAME environment variable.
    #[serde(default = "default_name")]
    pub name: String,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via HOARD_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to store per resource.
    ///
    /// Set via HOARD_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via HOARD_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a metadata statement waits on a busy database before SQLite
    /// gives up on that attempt.
    ///
    /// Set via HOARD_BUSY_TIMEOUT_MS environment variable.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Packaged-storage locations recognised for `ms-appdata` URIs.
    ///
    /// Empty means the platform defaults (temp, local and roaming data dirs).
    #[serde(default)]
    pub packaged_locations: Vec<PackagedLocation>,
}

fn default_root() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("hoard")
}

fn default_name() -> String {
    "resources".into()
}

fn default_user_agent() -> String {
    concat!("hoard/", env!("CARGO_PKG_VERSION")).into()
}

fn default_max_bytes() -> u64 {
    52_428_800 // 50MB
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            name: default_name(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            packaged_locations: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Busy timeout as Duration for the metadata store.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Configured packaged locations, falling back to the platform defaults.
    pub fn packaged_locations(&self) -> Vec<PackagedLocation> {
        if self.packaged_locations.is_empty() {
            PackagedLocation::platform_defaults()
        } else {
            self.packaged_locations.clone()
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HOARD_`
    /// 2. TOML file from `HOARD_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HOARD_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HOARD_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
