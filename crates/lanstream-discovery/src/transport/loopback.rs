//! In-memory discovery network for tests and single-process setups.
//!
//! Every [`LoopbackTransport`] joined to the same [`LoopbackNetwork`] behaves
//! like a member of one multicast group: [`Target::Group`] reaches every
//! member (the sender included, as with multicast loopback enabled) and
//! [`Target::Host`] reaches the members with that address.  Payloads are
//! sealed and opened with each member's own secret exactly as on the wire,
//! so secret mismatches behave the same way.
//!
//! Delivery is synchronous: `send` returns after every recipient's listeners
//! have run.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};

use lanstream_core::Encryption;

use super::{DatagramListener, DatagramSink, DatagramTransport, Target, TransportError, TransportShared};

/// First port handed out to joined members.
const FIRST_PORT: u16 = 50_000;

struct Member {
    address: SocketAddr,
    shared: Weak<TransportShared>,
}

#[derive(Default)]
struct NetworkState {
    members: Vec<Member>,
    next_port: u16,
}

/// A shared in-memory "group".  Cloning yields another handle to the same
/// network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member whose datagrams appear to come from `ip`.  The member
    /// leaves the network when the returned transport is dropped.
    pub fn join(&self, ip: IpAddr) -> LoopbackTransport {
        let shared = Arc::new(TransportShared::default());
        let mut state = self.lock();
        let port = FIRST_PORT.wrapping_add(state.next_port);
        state.next_port = state.next_port.wrapping_add(1);
        let address = SocketAddr::new(ip, port);
        state.members.push(Member {
            address,
            shared: Arc::downgrade(&shared),
        });
        LoopbackTransport {
            network: self.clone(),
            address,
            shared,
        }
    }

    /// Number of live members.
    pub fn member_count(&self) -> usize {
        self.lock().members.iter().filter(|m| m.shared.strong_count() > 0).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live recipients for `target`, pruning members that have gone away.
    fn recipients(&self, target: Target) -> Vec<(SocketAddr, Arc<TransportShared>)> {
        let mut state = self.lock();
        state.members.retain(|m| m.shared.strong_count() > 0);
        state
            .members
            .iter()
            .filter(|m| match target {
                Target::Group => true,
                Target::Host(ip) => m.address.ip() == ip,
            })
            .filter_map(|m| m.shared.upgrade().map(|shared| (m.address, shared)))
            .collect()
    }
}

/// One member of a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    address: SocketAddr,
    shared: Arc<TransportShared>,
}

impl LoopbackTransport {
    /// The address other members see as the datagram source.
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl DatagramSink for LoopbackTransport {
    fn send(&self, payload: &[u8], target: Target) -> Result<(), TransportError> {
        let sealed = self.shared.seal(payload)?;
        // The network lock is released before any listener runs, so
        // listeners may reply from inside `on_datagram`.
        for (address, shared) in self.network.recipients(target) {
            let reply_sink = LoopbackTransport {
                network: self.network.clone(),
                address,
                shared: Arc::clone(&shared),
            };
            shared.deliver(self.address, &sealed, &reply_sink);
        }
        Ok(())
    }
}

impl DatagramTransport for LoopbackTransport {
    fn add_listener(&self, listener: Arc<dyn DatagramListener>) {
        self.shared.add_listener(listener);
    }

    fn set_encryption(&self, encryption: Option<Encryption>) {
        self.shared.set_encryption(encryption);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
