//! Application layer use cases for the client.
//!
//! - **`select_server`** – Keeps track of which discovered server the
//!   client listens to.  Only servers whose verification token opens with
//!   the client's secret and that currently advertise audio are candidates.
//!   A server already chosen stays chosen while it remains a candidate, so a
//!   second server appearing on the network does not interrupt playback.

pub mod select_server;
