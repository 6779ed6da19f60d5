//! # lanstream-discovery
//!
//! Finds LanStream servers on the local network without any manual address
//! entry.
//!
//! # How discovery works (for beginners)
//!
//! 1. A client sends a `SERVER_SEARCH` datagram to a UDP multicast group.
//!    Every host that joined the group receives it.
//! 2. Each server's [`ControlResponder`] answers the sender directly with a
//!    `SERVER_SEARCH_RESPONSE`: its control port, its audio port and format
//!    (if it is streaming), and an encryption verification token.
//! 3. The client's [`ServerBrowser`] records each answer in a registry and
//!    forgets servers that stop answering.
//! 4. The client tests its own secret against each token locally.  Servers
//!    whose token does not open are simply not offered.
//!
//! Every datagram is sealed with the shared secret by the transport, so a
//! client with the wrong secret never even sees the responses.

pub mod control;
pub mod transport;

pub use control::browser::{BrowserConfig, BrowserEvent, ServerBrowser};
pub use control::direct::{query_server, ControlServer};
pub use control::responder::ControlResponder;
pub use control::ControlError;
pub use transport::loopback::{LoopbackNetwork, LoopbackTransport};
pub use transport::multicast::{MulticastConfig, MulticastTransport};
pub use transport::{
    Datagram, DatagramListener, DatagramSink, DatagramTransport, ListenerError, Target, TransportError,
};
