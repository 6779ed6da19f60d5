//! Domain entities for LanStream discovery.
//!
//! This module contains pure bookkeeping with no infrastructure dependencies:
//! no sockets, no threads, no clocks other than the [`std::time::Instant`]
//! values callers pass in.
//!
//! # Why pass `now` in? (for beginners)
//!
//! The registry decides staleness by comparing "last seen" to "now".  If the
//! registry read the clock itself, a test for a five-second staleness window
//! would have to sleep for five seconds.  Taking `now` as a parameter lets
//! tests move time forward instantly, and the production caller simply passes
//! `Instant::now()`.

/// A server discovered through a search response.
pub mod server;

/// The table of discovered servers with staleness eviction.
pub mod registry;
