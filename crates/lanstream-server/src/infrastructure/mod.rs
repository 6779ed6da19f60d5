//! Infrastructure layer for the streaming server.
//!
//! Contains OS-facing adapters: audio capture devices and the capture loop,
//! the TCP audio distribution server, and file-system configuration storage.
//!
//! **Dependency rule**: this layer may depend on `lanstream_core` and
//! `lanstream_discovery`, but MUST NOT import the `application` layer.

pub mod audio_capture;
pub mod network;
pub mod storage;
