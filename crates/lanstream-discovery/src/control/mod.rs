//! The SERVER_SEARCH / SERVER_SEARCH_RESPONSE exchange.
//!
//! - [`responder::ControlResponder`] answers searches on behalf of a server.
//! - [`browser::ServerBrowser`] sends searches and keeps the
//!   [`RemoteServerRegistry`](lanstream_core::RemoteServerRegistry) current.
//! - [`direct`] runs the same exchange over TCP on the advertised control
//!   port, for hosts that multicast cannot reach.

pub mod browser;
pub mod direct;
pub mod responder;

use std::io;
use std::net::SocketAddr;

use lanstream_core::{CryptoError, PacketType, ProtocolError};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors produced by the control protocol components.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The control listener could not be bound.
    #[error("failed to bind control endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The verification token could not be built.
    #[error("failed to build verification token: {0}")]
    Token(#[from] CryptoError),

    /// Sending a search over the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A control connection failed or timed out.
    #[error("control connection error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that are not a valid packet.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer answered with the wrong packet type.
    #[error("unexpected {0:?} packet from control endpoint")]
    UnexpectedPacket(PacketType),

    /// A background thread could not be started.
    #[error("failed to spawn control thread: {0}")]
    Spawn(#[source] io::Error),
}
