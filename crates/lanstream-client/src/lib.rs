//! lanstream-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lanstream-client do? (for beginners)
//!
//! The *client* is a listener.  It does not need to be told where a server
//! is:
//!
//! 1. It joins the discovery multicast group and keeps asking
//!    "who is streaming?" (`SERVER_SEARCH`).
//! 2. Each answer carries a verification token.  The client tries to open
//!    the token with its own secret, locally.  Servers it cannot open are
//!    hidden, because the client could not talk to them anyway.
//! 3. From the remaining servers it picks one that advertises audio,
//!    connects to the advertised TCP port and copies the raw PCM to stdout
//!    or a file, where a player such as `aplay` or `ffplay` can pick it up.

/// Application layer: choosing which server to listen to.
pub mod application;

/// Infrastructure layer: the TCP audio receiver and config persistence.
pub mod infrastructure;
