//! TOML-based configuration persistence for the client.
//!
//! Reads and writes [`ClientConfig`] from the platform-appropriate file:
//! - Windows:  `%APPDATA%\LanStream\client.toml`
//! - Linux:    `~/.config/lanstream/client.toml`
//! - macOS:    `~/Library/Application Support/LanStream/client.toml`
//!
//! or from an explicit path given on the command line.  Locating, reading
//! and writing the file is shared with the other binary through
//! [`lanstream_core::config_file`]; this module owns the schema.
//!
//! Example:
//!
//! ```toml
//! [network]
//! multicast_group = "239.255.43.21"
//! discovery_port = 45210
//!
//! [discovery]
//! search_interval_ms = 1000
//! stale_after_ms = 5000
//!
//! [security]
//! secret = "swordfish"
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanstream_core::config_file::{self, ConfigFileError};
use lanstream_core::constants::{DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_GROUP};
use lanstream_discovery::{BrowserConfig, MulticastConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "client.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Locating, reading, parsing or writing the file failed.
    #[error(transparent)]
    File(#[from] ConfigFileError),

    /// The values parse but cannot work together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Group servers listen on for searches.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Interface for multicast; absent means pick the first suitable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Ipv4Addr>,
}

/// Search cadence and how long a silent server is remembered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_search_interval_ms")]
    pub search_interval_ms: u64,
    /// Must exceed the search interval or live servers flicker.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_multicast_group() -> Ipv4Addr {
    DEFAULT_MULTICAST_GROUP
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_search_interval_ms() -> u64 {
    1_000
}
fn default_stale_after_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            discovery_port: default_discovery_port(),
            interface: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_interval_ms: default_search_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Rejects combinations that would parse but never work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.network.multicast_group.is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "{} is not a multicast address",
                self.network.multicast_group
            )));
        }
        if self.discovery.search_interval_ms == 0 {
            return Err(ConfigError::Invalid("search_interval_ms must be positive".into()));
        }
        if self.discovery.stale_after_ms <= self.discovery.search_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "stale_after_ms ({}) must exceed search_interval_ms ({})",
                self.discovery.stale_after_ms, self.discovery.search_interval_ms
            )));
        }
        Ok(())
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            search_interval: Duration::from_millis(self.discovery.search_interval_ms),
            stale_after: Duration::from_millis(self.discovery.stale_after_ms),
        }
    }

    pub fn multicast_config(&self) -> MulticastConfig {
        MulticastConfig {
            group: self.network.multicast_group,
            port: self.network.discovery_port,
            interface: self.network.interface,
            ..MulticastConfig::default()
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::File`] wrapping
/// [`ConfigFileError::NoPlatformConfigDir`] when the base directory cannot be
/// determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    Ok(config_file::config_dir()?)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_file::config_file_path(CONFIG_FILE_NAME)?)
}

/// Loads the config from the default location, or defaults if absent.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ClientConfig` from `path`, returning `ClientConfig::default()` if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::File`] for file-system errors other than "not
/// found" and for malformed TOML.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    Ok(config_file::load_or_default(path)?)
}

/// Persists `config` to the default location and returns the path written.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &ClientConfig) -> Result<PathBuf, ConfigError> {
    let path = config_file_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::File`] for file-system or serialization failures.
pub fn save_config_to(config: &ClientConfig, path: &Path) -> Result<(), ConfigError> {
    Ok(config_file::save(config, path)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
