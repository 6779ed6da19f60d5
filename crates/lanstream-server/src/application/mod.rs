//! Application layer for the streaming server.
//!
//! # What lives here? (for beginners)
//!
//! The infrastructure layer provides the moving parts: a discovery transport,
//! a control responder, a TCP control endpoint and the audio server.  None of
//! them knows about the others.  The application layer holds them together
//! so that, for example, starting the audio server also changes what the
//! responder advertises to searching clients.
//!
//! # Sub-modules
//!
//! - **`stream_service`** – Owns every server-side component and keeps the
//!   advertisement in step with the audio server's state and the secret.

pub mod stream_service;
