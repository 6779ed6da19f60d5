//! The search exchange over TCP on the advertised control port.
//!
//! Each request and response is one length-prefixed frame (see
//! [`lanstream_core::write_frame`]).  A connection may carry any number of
//! searches; the server closes it after [`IDLE_TIMEOUT`] without a request.
//!
//! The control channel is not encrypted: a response only carries ports, a
//! format and the verification token, and the token is already sealed.

use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lanstream_core::{
    decode_packet, encode_packet, read_frame, write_frame, DiscoveryPacket, ProtocolError,
    RemoteServerRecord,
};
use tracing::{debug, info, warn};

use super::responder::ControlResponder;
use super::ControlError;
use crate::transport::is_timeout_error;

/// How long a control connection may sit idle before the server drops it.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval at which the accept loop rechecks its running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// TCP listener answering framed searches from a [`ControlResponder`].
pub struct ControlServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Binds `addr` and starts the accept thread.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Bind`] if the port is unavailable.
    pub fn bind(addr: SocketAddr, responder: Arc<ControlResponder>) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).map_err(|source| ControlError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ControlError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let acceptor = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("lanstream-control".to_string())
                .spawn(move || accept_loop(listener, responder, running))
                .map_err(ControlError::Spawn)?
        };

        info!(%local_addr, "Control endpoint listening");
        Ok(Self {
            local_addr,
            running,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes the listener.  In-flight connections
    /// finish their current request.  Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.acceptor.take() {
            if handle.join().is_err() {
                warn!("Control accept thread panicked");
            }
            info!(local_addr = %self.local_addr, "Control endpoint stopped");
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, responder: Arc<ControlResponder>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let responder = Arc::clone(&responder);
                let spawned = thread::Builder::new()
                    .name("lanstream-control-conn".to_string())
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, &responder) {
                            debug!(%peer, "Control connection ended: {e}");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(%peer, "Failed to spawn control connection thread: {e}");
                }
            }
            Err(e) if is_timeout_error(&e) => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Control accept error: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    // `listener` drops here, so the port refuses new connections.
}

fn serve_connection(stream: TcpStream, responder: &ControlResponder) -> Result<(), ControlError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
    stream.set_write_timeout(Some(IDLE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let request = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(ProtocolError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match decode_packet(&request)? {
            DiscoveryPacket::ServerSearch => {
                let reply = encode_packet(&DiscoveryPacket::ServerSearchResponse(responder.response()));
                write_frame(&mut writer, &reply)?;
            }
            other => return Err(ControlError::UnexpectedPacket(other.packet_type())),
        }
    }
}

/// Asks the control endpoint at `addr` for its advertisement.
///
/// The returned record is keyed by `addr` and its audio endpoint (if any)
/// uses `addr`'s host.
///
/// # Errors
///
/// Returns [`ControlError::Io`] for connect/read/write failures and timeouts,
/// [`ControlError::Protocol`] for an invalid reply, and
/// [`ControlError::UnexpectedPacket`] if the reply is not a response.
pub fn query_server(addr: SocketAddr, timeout: Duration) -> Result<RemoteServerRecord, ControlError> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    write_frame(&mut writer, &encode_packet(&DiscoveryPacket::ServerSearch))?;
    let reply = read_frame(&mut reader)?;
    match decode_packet(&reply)? {
        DiscoveryPacket::ServerSearchResponse(response) => {
            let mut record = RemoteServerRecord::from_response(addr.ip(), &response);
            record.control_address = addr;
            debug!(server = %addr, audio = record.has_audio(), "Direct query answered");
            Ok(record)
        }
        other => Err(ControlError::UnexpectedPacket(other.packet_type())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
