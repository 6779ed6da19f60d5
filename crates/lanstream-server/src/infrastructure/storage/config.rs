//! TOML-based configuration persistence for the streaming server.
//!
//! Reads and writes [`ServerConfig`] from the platform-appropriate file:
//! - Windows:  `%APPDATA%\LanStream\server.toml`
//! - Linux:    `~/.config/lanstream/server.toml`
//! - macOS:    `~/Library/Application Support/LanStream/server.toml`
//!
//! or from an explicit path given on the command line.  Locating, reading
//! and writing the file is shared with the other binary through
//! [`lanstream_core::config_file`]; this module owns the schema.
//!
//! Example:
//!
//! ```toml
//! [network]
//! control_port = 45211
//! audio_port = 45212
//!
//! [audio]
//! sample_rate = 48000.0
//! channels = 2
//! overflow = "drop-oldest"
//!
//! [source]
//! kind = "tone"
//! tone_frequency = 440.0
//!
//! [security]
//! secret = "swordfish"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section or
//! a missing key all fall back to working values.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanstream_core::config_file::{self, ConfigFileError};
use lanstream_core::constants::{
    DEFAULT_AUDIO_PORT, DEFAULT_BUFFER_CHUNKS, DEFAULT_CHUNK_SIZE, DEFAULT_CONTROL_PORT, DEFAULT_DISCOVERY_PORT,
    DEFAULT_MULTICAST_GROUP,
};
use lanstream_core::{AudioEncoding, AudioFormat};
use lanstream_discovery::MulticastConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::audio_capture::fanout::OverflowPolicy;
use crate::infrastructure::network::audio_server::AudioServerConfig;

/// File name inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "server.toml";

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

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discovery group and listening ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IPv4 multicast group searched by clients.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    /// UDP port of the multicast group.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port of the control endpoint (advertised in search responses).
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// TCP port audio clients connect to.
    #[serde(default = "default_audio_port")]
    pub audio_port: u16,
    /// Address the TCP listeners bind.  `0.0.0.0` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Interface for multicast; absent means pick the first suitable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Ipv4Addr>,
    /// Multicast TTL; 1 keeps discovery on the local subnet.
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
}

/// How buffers behave when a client falls behind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowMode {
    #[default]
    DropOldest,
    Grace,
}

/// Captured format and buffering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Encoding name as sent on the wire, e.g. `"PCM_SIGNED"`.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    #[serde(default = "default_sample_size_bits")]
    pub sample_size_bits: i32,
    #[serde(default = "default_channels")]
    pub channels: i32,
    #[serde(default)]
    pub big_endian: bool,
    /// Bytes per device read and per TCP write.  Must hold whole frames.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-client buffer capacity in chunks.
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,
    #[serde(default)]
    pub overflow: OverflowMode,
    /// How recently a client must have read to get the extra room in
    /// `grace` mode.
    #[serde(default = "default_overflow_grace_ms")]
    pub overflow_grace_ms: u64,
}

/// Where the PCM comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A generated sine tone.
    #[default]
    Tone,
    /// Raw PCM on standard input, already in the configured format.
    Stdin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_tone_frequency")]
    pub tone_frequency: f32,
}

/// Shared secret.  Absent means discovery runs unencrypted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
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
fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn default_audio_port() -> u16 {
    DEFAULT_AUDIO_PORT
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_multicast_ttl() -> u32 {
    1
}
fn default_encoding() -> String {
    AudioEncoding::PcmSigned.name().to_string()
}
fn default_sample_rate() -> f32 {
    44_100.0
}
fn default_sample_size_bits() -> i32 {
    16
}
fn default_channels() -> i32 {
    2
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_buffer_chunks() -> usize {
    DEFAULT_BUFFER_CHUNKS
}
fn default_overflow_grace_ms() -> u64 {
    500
}
fn default_tone_frequency() -> f32 {
    440.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            discovery_port: default_discovery_port(),
            control_port: default_control_port(),
            audio_port: default_audio_port(),
            bind_address: default_bind_address(),
            interface: None,
            multicast_ttl: default_multicast_ttl(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            sample_rate: default_sample_rate(),
            sample_size_bits: default_sample_size_bits(),
            channels: default_channels(),
            big_endian: false,
            chunk_size: default_chunk_size(),
            buffer_chunks: default_buffer_chunks(),
            overflow: OverflowMode::default(),
            overflow_grace_ms: default_overflow_grace_ms(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            tone_frequency: default_tone_frequency(),
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

impl AudioConfig {
    /// The descriptor the device is opened with and clients are told about.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::linear(
            AudioEncoding::from_name(&self.encoding),
            self.sample_rate,
            self.sample_size_bits,
            self.channels,
            self.big_endian,
        )
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        match self.overflow {
            OverflowMode::DropOldest => OverflowPolicy::DropOldest,
            OverflowMode::Grace => OverflowPolicy::Grace {
                max_wait: Duration::from_millis(self.overflow_grace_ms),
            },
        }
    }
}

impl ServerConfig {
    /// Checks values that parse individually but cannot work together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.chunk_size == 0 {
            return Err(ConfigError::Invalid("audio.chunk_size must be non-zero".to_string()));
        }
        if audio.buffer_chunks == 0 {
            return Err(ConfigError::Invalid("audio.buffer_chunks must be non-zero".to_string()));
        }
        if audio.sample_rate <= 0.0 || audio.channels <= 0 || audio.sample_size_bits <= 0 {
            return Err(ConfigError::Invalid(
                "audio.sample_rate, channels and sample_size_bits must be positive".to_string(),
            ));
        }
        if let Some(frame) = audio.format().frame_bytes() {
            if audio.chunk_size % frame != 0 {
                return Err(ConfigError::Invalid(format!(
                    "audio.chunk_size {} is not a multiple of the {frame}-byte frame",
                    audio.chunk_size
                )));
            }
        }
        if !self.network.multicast_group.is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "network.multicast_group {} is not a multicast address",
                self.network.multicast_group
            )));
        }
        Ok(())
    }

    pub fn audio_server_config(&self) -> AudioServerConfig {
        AudioServerConfig {
            bind_addr: SocketAddr::new(self.network.bind_address, self.network.audio_port),
            format: self.audio.format(),
            chunk_size: self.audio.chunk_size,
            buffer_chunks: self.audio.buffer_chunks,
            overflow: self.audio.overflow_policy(),
        }
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.network.control_port)
    }

    pub fn multicast_config(&self) -> MulticastConfig {
        MulticastConfig {
            group: self.network.multicast_group,
            port: self.network.discovery_port,
            interface: self.network.interface,
            ttl: self.network.multicast_ttl,
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
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ServerConfig` from `path`, returning `ServerConfig::default()` if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::File`] for file-system errors other than "not
/// found" and for malformed TOML.
pub fn load_config_from(path: &Path) -> Result<ServerConfig, ConfigError> {
    Ok(config_file::load_or_default(path)?)
}

/// Persists `config` to the default location and returns the path written.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &ServerConfig) -> Result<PathBuf, ConfigError> {
    let path = config_file_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::File`] for file-system or serialization failures.
pub fn save_config_to(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    Ok(config_file::save(config, path)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
