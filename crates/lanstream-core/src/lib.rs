//! # lanstream-core
//!
//! Shared library for LanStream containing the shared-secret cipher, the
//! binary packet codec used for discovery, the audio format descriptor, and
//! the in-memory registry of discovered servers.
//!
//! This crate is used by the discovery, server and client crates.
//! It has zero dependencies on OS audio APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! LanStream captures an audio input on one machine and streams the raw PCM
//! to any number of listeners on the same LAN.  Listeners find streaming
//! machines automatically by shouting "who is out there?" on a UDP multicast
//! group and collecting the answers.
//!
//! This crate (`lanstream-core`) is the shared foundation.  It defines:
//!
//! - **`crypto`** – How datagrams are protected.  Every message gets its own
//!   key, derived from the shared secret and a random salt, and is sealed with
//!   AES-256-GCM so tampering is detected.  A *verification token* lets a
//!   listener test its secret against a server without any round trip.
//!
//! - **`protocol`** – How bytes travel over the network.  Packets start with a
//!   magic string, followed by typed big-endian fields.  The discovery
//!   messages (`SERVER_SEARCH` and `SERVER_SEARCH_RESPONSE`) and the audio
//!   format descriptor are defined here.
//!
//! - **`domain`** – Pure bookkeeping with no OS dependencies: the record of a
//!   discovered server and the registry that evicts servers that stop
//!   answering.
//!
//! - **`config_file`** – Where the binaries keep their TOML settings and how
//!   a settings struct is loaded from and saved to that file.

pub mod config_file;
pub mod constants;
pub mod crypto;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lanstream_core::Encryption` instead of `lanstream_core::crypto::cipher::Encryption`.
pub use crypto::cipher::{CryptoError, Encryption};
pub use crypto::verification::{EncryptionVerification, VerificationError};
pub use domain::registry::{RegistryChange, RemoteServerRegistry};
pub use domain::server::{RemoteAudioEndpoint, RemoteServerRecord};
pub use protocol::codec::{read_frame, write_frame, PacketBuilder, PacketReader, ProtocolError, MAGIC};
pub use protocol::format::{AudioEncoding, AudioFormat};
pub use protocol::messages::{
    decode_packet, encode_packet, AdvertisedAudio, DiscoveryPacket, PacketType, ServerSearchResponse,
};
