//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the server's TOML file from the platform
//! config directory (or an explicit path), writes it back, and falls back to
//! defaults when the file does not exist yet.

pub mod config;
