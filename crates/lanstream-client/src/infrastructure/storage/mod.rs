//! Persistent storage for the client.

pub mod config;
