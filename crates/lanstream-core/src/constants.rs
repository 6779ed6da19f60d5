//! Default ports, addresses and sizes shared by every LanStream binary.

use std::net::Ipv4Addr;

/// Administratively scoped multicast group used for discovery.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 43, 21);

/// UDP port of the discovery multicast group.
pub const DEFAULT_DISCOVERY_PORT: u16 = 45210;

/// TCP port of the control endpoint advertised in search responses.
pub const DEFAULT_CONTROL_PORT: u16 = 45211;

/// TCP port the audio distribution server listens on.
pub const DEFAULT_AUDIO_PORT: u16 = 45212;

/// Upper bound on a single discovery datagram, including the salt and tag.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Bytes of PCM written to a client socket per send.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Capacity of each client's fan-out buffer, in chunks.
pub const DEFAULT_BUFFER_CHUNKS: usize = 8;
