//! Datagram transports for the discovery channel.
//!
//! A transport moves opaque payloads between peers on the same LAN.  It owns
//! the encryption step: payloads handed to [`DatagramSink::send`] are sealed
//! with the configured secret before they leave, and received datagrams are
//! opened before any [`DatagramListener`] sees them.  A datagram that does not
//! open under the local secret is dropped without reaching a listener.
//!
//! Two implementations exist:
//!
//! - [`multicast::MulticastTransport`]: the real thing, a UDP multicast group.
//! - [`loopback::LoopbackNetwork`]: an in-memory network for tests, with the
//!   same encryption and dispatch rules but no sockets.
//!
//! # Listener contract (for beginners)
//!
//! Listeners run synchronously on the transport's receive thread.  They should
//! do a small amount of work (decode, update a table, maybe send a reply) and
//! return.  A listener that returns an error or even panics only loses that
//! one datagram; the receive loop carries on with the next one.

pub mod loopback;
pub mod multicast;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use lanstream_core::{CryptoError, Encryption, ProtocolError};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced by transport setup and sends.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No non-loopback IPv4 interface is available to join the group on.
    #[error("no multicast-capable IPv4 interface found")]
    NoMulticastInterface,

    /// Listing the local network interfaces failed.
    #[error("failed to enumerate network interfaces: {0}")]
    InterfaceQuery(#[source] io::Error),

    /// A socket could not be created or bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Joining the multicast group failed.
    #[error("failed to join {group} on {interface}: {source}")]
    Join {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    /// Setting a socket option failed.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] io::Error),

    /// The receive thread could not be started.
    #[error("failed to spawn discovery receive thread: {0}")]
    Spawn(#[source] io::Error),

    /// Sending one datagram failed.
    #[error("failed to send datagram to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The payload could not be sealed.
    #[error("failed to seal datagram: {0}")]
    Encryption(#[from] CryptoError),

    /// API misuse: opening twice, closing before open, sending while closed.
    #[error("transport usage error: {0}")]
    Usage(&'static str),
}

/// Error a listener may return for one datagram.  Logged and dropped.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("undecodable datagram: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("reply failed: {0}")]
    Transport(#[from] TransportError),
}

/// Destination of an outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every member of the discovery group.
    Group,
    /// One host, at the group's port.  Used for replies.
    Host(IpAddr),
}

/// A received datagram after decryption.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    /// Address the datagram came from.
    pub source: SocketAddr,
    /// Opened payload.
    pub payload: &'a [u8],
}

/// Something datagrams can be sent through.
pub trait DatagramSink: Send + Sync {
    /// Seals `payload` under the configured secret (if any) and sends it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if sealing or the send fails.
    fn send(&self, payload: &[u8], target: Target) -> Result<(), TransportError>;
}

/// Receives opened datagrams on the transport's receive thread.
pub trait DatagramListener: Send + Sync {
    /// Handles one datagram.  `sink` sends replies through the transport that
    /// received it.
    ///
    /// # Errors
    ///
    /// Any error is logged by the transport and the datagram is dropped.
    fn on_datagram(&self, datagram: &Datagram<'_>, sink: &dyn DatagramSink) -> Result<(), ListenerError>;
}

/// A discovery transport: a sink plus listener registration and keying.
pub trait DatagramTransport: DatagramSink {
    /// Adds a listener.  Listeners are called in registration order.
    fn add_listener(&self, listener: Arc<dyn DatagramListener>);

    /// Replaces the secret used for both directions.  `None` sends and
    /// accepts plaintext.
    fn set_encryption(&self, encryption: Option<Encryption>);
}

// ── Shared seal / dispatch ────────────────────────────────────────────────────

/// Listener table and secret shared between a transport handle and its
/// receive path.
#[derive(Default)]
pub(crate) struct TransportShared {
    listeners: RwLock<Vec<Arc<dyn DatagramListener>>>,
    encryption: RwLock<Option<Encryption>>,
}

impl TransportShared {
    pub(crate) fn add_listener(&self, listener: Arc<dyn DatagramListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub(crate) fn set_encryption(&self, encryption: Option<Encryption>) {
        match self.encryption.write() {
            Ok(mut slot) => *slot = encryption,
            Err(poisoned) => *poisoned.into_inner() = encryption,
        }
    }

    fn encryption(&self) -> Option<Encryption> {
        match self.encryption.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Seals an outgoing payload, or copies it when no secret is set.
    pub(crate) fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        match self.encryption() {
            Some(enc) => Ok(enc.encrypt(payload)?),
            None => Ok(payload.to_vec()),
        }
    }

    /// Opens a received datagram and hands it to every listener.
    ///
    /// Datagrams that fail to open are dropped at debug level: other groups
    /// and other secrets share the multicast address.  Listener errors and
    /// panics are logged and do not affect later listeners or datagrams.
    pub(crate) fn deliver(&self, source: SocketAddr, raw: &[u8], sink: &dyn DatagramSink) {
        let opened;
        let payload = match self.encryption() {
            Some(enc) => match enc.decrypt(raw) {
                Ok(plain) => {
                    opened = plain;
                    opened.as_slice()
                }
                Err(e) => {
                    debug!(%source, len = raw.len(), "Dropping datagram that did not decrypt: {e}");
                    return;
                }
            },
            None => raw,
        };

        let listeners: Vec<Arc<dyn DatagramListener>> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let datagram = Datagram { source, payload };
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_datagram(&datagram, sink)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(ListenerError::Protocol(e))) => {
                    debug!(%source, "Ignoring datagram: {e}");
                }
                Ok(Err(e)) => warn!(%source, "Discovery listener failed: {e}"),
                Err(_) => warn!(%source, "Discovery listener panicked; continuing"),
            }
        }
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
