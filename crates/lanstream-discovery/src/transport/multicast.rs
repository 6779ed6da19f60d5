//! UDP multicast discovery transport.
//!
//! [`MulticastTransport::open`] picks an IPv4 interface, joins the discovery
//! group on it and starts a receive thread.  Two sockets are used:
//!
//! - the **receive socket**, bound to `0.0.0.0:<port>` with address reuse so
//!   several LanStream processes on one machine can share the group, and
//! - the **send socket**, bound to an ephemeral port with the outgoing
//!   multicast interface, TTL and loopback set.
//!
//! Replies ([`Target::Host`]) go to `<host>:<port>`, which lands on the
//! requester's receive socket.
//!
//! # Read timeout
//!
//! The receive socket has a 200 ms read timeout.  On each timeout the loop
//! checks the `running` flag, so [`MulticastTransport::close`] stops the
//! thread within one poll interval and then joins it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use lanstream_core::constants::{DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_GROUP, MAX_DATAGRAM_SIZE};
use lanstream_core::Encryption;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{
    is_timeout_error, DatagramListener, DatagramSink, DatagramTransport, Target, TransportError,
    TransportShared,
};

/// How long one `recv_from` may block before the running flag is rechecked.
const RECV_POLL: Duration = Duration::from_millis(200);

/// Multicast transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastConfig {
    /// Group address; must be an IPv4 multicast address.
    pub group: Ipv4Addr,
    /// UDP port shared by every member of the group.
    pub port: u16,
    /// Interface to join on.  `None` selects one automatically.
    pub interface: Option<Ipv4Addr>,
    /// Multicast TTL.  `1` keeps datagrams on the local subnet.
    pub ttl: u32,
    /// Deliver our own group sends back to us (needed when a server and a
    /// client run on the same host).
    pub loopback: bool,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_DISCOVERY_PORT,
            interface: None,
            ttl: 1,
            loopback: true,
        }
    }
}

/// Sends through the unicast/multicast send socket.  Shared by the transport
/// handle and the receive thread (for replies).
#[derive(Clone)]
struct SocketSink {
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    shared: Arc<TransportShared>,
}

impl DatagramSink for SocketSink {
    fn send(&self, payload: &[u8], target: Target) -> Result<(), TransportError> {
        let dest = match target {
            Target::Group => SocketAddr::V4(self.group),
            Target::Host(ip) => SocketAddr::new(ip, self.group.port()),
        };
        let sealed = self.shared.seal(payload)?;
        if sealed.len() > MAX_DATAGRAM_SIZE {
            warn!(%dest, len = sealed.len(), "Datagram exceeds {MAX_DATAGRAM_SIZE} bytes; receivers will truncate it");
        }
        self.socket
            .send_to(&sealed, dest)
            .map_err(|source| TransportError::Send { target: dest, source })?;
        Ok(())
    }
}

struct OpenTransport {
    sink: SocketSink,
    interface: Ipv4Addr,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    receiver_id: ThreadId,
}

enum TransportState {
    Idle,
    Open(OpenTransport),
    Closed,
}

/// Discovery transport over a UDP multicast group.
pub struct MulticastTransport {
    config: MulticastConfig,
    shared: Arc<TransportShared>,
    state: Mutex<TransportState>,
}

impl MulticastTransport {
    /// Creates an unopened transport.  Listeners and the secret may be set
    /// before or after [`open`](Self::open).
    pub fn new(config: MulticastConfig) -> Self {
        Self {
            config,
            shared: Arc::new(TransportShared::default()),
            state: Mutex::new(TransportState::Idle),
        }
    }

    pub fn config(&self) -> &MulticastConfig {
        &self.config
    }

    /// Joins the group and starts the receive thread.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Usage`] if the transport was already opened.
    /// - [`TransportError::NoMulticastInterface`] when no interface qualifies.
    /// - [`TransportError::Bind`] / [`TransportError::Join`] /
    ///   [`TransportError::Socket`] for socket setup failures.
    pub fn open(&self) -> Result<(), TransportError> {
        let mut state = self.lock_state();
        match *state {
            TransportState::Idle => {}
            TransportState::Open(_) => return Err(TransportError::Usage("transport is already open")),
            TransportState::Closed => return Err(TransportError::Usage("transport was closed")),
        }

        let interface = match self.config.interface {
            Some(addr) => addr,
            None => select_interface()?,
        };
        let recv_socket = bind_receive_socket(&self.config, interface)?;
        let send_socket = bind_send_socket(&self.config, interface)?;

        let sink = SocketSink {
            socket: Arc::new(send_socket),
            group: SocketAddrV4::new(self.config.group, self.config.port),
            shared: Arc::clone(&self.shared),
        };
        let running = Arc::new(AtomicBool::new(true));

        let receiver = {
            let sink = sink.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("lanstream-discovery-rx".to_string())
                .spawn(move || receive_loop(recv_socket, sink, running))
                .map_err(TransportError::Spawn)?
        };

        info!(
            group = %self.config.group,
            port = self.config.port,
            %interface,
            "Discovery transport open"
        );

        *state = TransportState::Open(OpenTransport {
            sink,
            interface,
            running,
            receiver_id: receiver.thread().id(),
            receiver: Some(receiver),
        });
        Ok(())
    }

    /// Stops the receive thread and releases both sockets.
    ///
    /// When called from a listener (i.e. on the receive thread itself) the
    /// thread is signalled but not joined; it exits after the current
    /// datagram.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Usage`] if the transport is not open.
    pub fn close(&self) -> Result<(), TransportError> {
        let open = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, TransportState::Closed) {
                TransportState::Open(open) => open,
                TransportState::Idle => {
                    *state = TransportState::Idle;
                    return Err(TransportError::Usage("transport was never opened"));
                }
                TransportState::Closed => return Err(TransportError::Usage("transport is already closed")),
            }
        };
        shutdown(open);
        info!(group = %self.config.group, "Discovery transport closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), TransportState::Open(_))
    }

    /// The interface the group was joined on, while open.
    pub fn interface(&self) -> Option<Ipv4Addr> {
        match &*self.lock_state() {
            TransportState::Open(open) => Some(open.interface),
            _ => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sink(&self) -> Result<SocketSink, TransportError> {
        match &*self.lock_state() {
            TransportState::Open(open) => Ok(open.sink.clone()),
            _ => Err(TransportError::Usage("transport is not open")),
        }
    }
}

impl DatagramSink for MulticastTransport {
    fn send(&self, payload: &[u8], target: Target) -> Result<(), TransportError> {
        // Clone the sink so the state lock is not held across the syscall.
        self.sink()?.send(payload, target)
    }
}

impl DatagramTransport for MulticastTransport {
    fn add_listener(&self, listener: Arc<dyn DatagramListener>) {
        self.shared.add_listener(listener);
    }

    fn set_encryption(&self, encryption: Option<Encryption>) {
        self.shared.set_encryption(encryption);
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut *self.lock_state(), TransportState::Closed);
        if let TransportState::Open(open) = state {
            shutdown(open);
        }
    }
}

fn shutdown(mut open: OpenTransport) {
    open.running.store(false, Ordering::Release);
    if thread::current().id() == open.receiver_id {
        return;
    }
    if let Some(handle) = open.receiver.take() {
        if handle.join().is_err() {
            warn!("Discovery receive thread panicked");
        }
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

fn receive_loop(socket: UdpSocket, sink: SocketSink, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Acquire) {
        let (len, source) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    warn!("Discovery recv error: {e}");
                    thread::sleep(RECV_POLL);
                }
                continue;
            }
        };
        sink.shared.deliver(source, &buf[..len], &sink);
    }

    debug!("Discovery receive loop stopped");
}

// ── Socket setup ──────────────────────────────────────────────────────────────

/// Picks the interface to join the group on: the first non-loopback IPv4
/// address, with interfaces ordered by name so the choice is stable across
/// runs.
///
/// # Errors
///
/// Returns [`TransportError::NoMulticastInterface`] when nothing qualifies.
pub fn select_interface() -> Result<Ipv4Addr, TransportError> {
    let interfaces = if_addrs::get_if_addrs().map_err(TransportError::InterfaceQuery)?;
    let candidates = interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(v4) => Some((iface.name.as_str(), v4)),
            IpAddr::V6(_) => None,
        });
    let chosen = pick_first(candidates).ok_or(TransportError::NoMulticastInterface)?;
    debug!(interface = %chosen, "Selected discovery interface");
    Ok(chosen)
}

fn pick_first<'a>(candidates: impl Iterator<Item = (&'a str, Ipv4Addr)>) -> Option<Ipv4Addr> {
    let mut sorted: Vec<(&str, Ipv4Addr)> = candidates.filter(|(_, ip)| !ip.is_unspecified()).collect();
    sorted.sort();
    sorted.first().map(|(_, ip)| *ip)
}

fn bind_receive_socket(config: &MulticastConfig, interface: Ipv4Addr) -> Result<UdpSocket, TransportError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let bind_err = |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(TransportError::Socket)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(TransportError::Socket)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .join_multicast_v4(&config.group, &interface)
        .map_err(|source| TransportError::Join {
            group: config.group,
            interface,
            source,
        })?;
    socket.set_read_timeout(Some(RECV_POLL)).map_err(TransportError::Socket)?;
    Ok(socket.into())
}

fn bind_send_socket(config: &MulticastConfig, interface: Ipv4Addr) -> Result<UdpSocket, TransportError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let bind_err = |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_multicast_if_v4(&interface).map_err(TransportError::Socket)?;
    socket.set_multicast_ttl_v4(config.ttl).map_err(TransportError::Socket)?;
    socket.set_multicast_loop_v4(config.loopback).map_err(TransportError::Socket)?;
    Ok(socket.into())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
