//! Infrastructure layer: adapters between the client's use cases and the
//! outside world.
//!
//! - **`network`** – Receives the raw PCM stream from a server over TCP.
//! - **`storage`** – Reads and writes `client.toml`.
//!
//! Discovery itself lives in the `lanstream-discovery` crate, shared with
//! the server.

pub mod network;
pub mod storage;
