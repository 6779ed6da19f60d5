//! Network infrastructure for the streaming server.
//!
//! # Sub-modules
//!
//! - **`audio_server`** – Accepts TCP listeners on the audio port and writes
//!   the captured PCM to each of them through its own fan-out buffer.  The
//!   discovery side (multicast responder, control endpoint) lives in the
//!   `lanstream-discovery` crate and is wired up by the application layer.

pub mod audio_server;
