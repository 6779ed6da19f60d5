//! Network infrastructure for the client.
//!
//! The audio connection is one-way: after the TCP handshake the server
//! writes raw PCM frames and never expects a byte back.  The stream ends
//! when the server stops or drops the client.

pub mod audio_receiver;
