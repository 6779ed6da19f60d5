//! Discovery packets exchanged over the multicast group and the control port.
//!
//! Layout after the magic prefix:
//! ```text
//! SERVER_SEARCH           [type:i32 = 0]
//! SERVER_SEARCH_RESPONSE  [type:i32 = 1][control_port:i32][has_audio:bool]
//!                         ([audio_port:i32][format])?  [token_len:u32][token]
//! ```

use crate::crypto::verification::EncryptionVerification;
use crate::protocol::codec::{PacketBuilder, PacketReader, ProtocolError};
use crate::protocol::format::AudioFormat;

// ── Packet type codes ─────────────────────────────────────────────────────────

/// Discovery packet discriminant.
///
/// The ordinals are part of the wire contract.  New types get new numbers;
/// existing numbers are never reused or reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    ServerSearch,
    ServerSearchResponse,
}

impl PacketType {
    /// The 4-byte value written after the magic prefix.
    pub fn ordinal(self) -> i32 {
        match self {
            PacketType::ServerSearch => 0,
            PacketType::ServerSearchResponse => 1,
        }
    }
}

impl TryFrom<i32> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::ServerSearch),
            1 => Ok(PacketType::ServerSearchResponse),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

// ── Message structs ───────────────────────────────────────────────────────────

/// Audio endpoint a server advertises while it is streaming.  The host is
/// never sent: receivers take it from the datagram's source address.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisedAudio {
    pub port: u16,
    pub format: AudioFormat,
}

/// Body of a `SERVER_SEARCH_RESPONSE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSearchResponse {
    pub control_port: u16,
    /// `None` when the server is reachable but not currently streaming.
    pub audio: Option<AdvertisedAudio>,
    pub verification: EncryptionVerification,
}

/// Every packet that travels on the discovery channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryPacket {
    ServerSearch,
    ServerSearchResponse(ServerSearchResponse),
}

impl DiscoveryPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            DiscoveryPacket::ServerSearch => PacketType::ServerSearch,
            DiscoveryPacket::ServerSearchResponse(_) => PacketType::ServerSearchResponse,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes a discovery packet, magic prefix included.
///
/// # Examples
///
/// ```rust
/// use lanstream_core::{decode_packet, encode_packet, DiscoveryPacket};
///
/// let bytes = encode_packet(&DiscoveryPacket::ServerSearch);
/// assert_eq!(decode_packet(&bytes).unwrap(), DiscoveryPacket::ServerSearch);
/// ```
pub fn encode_packet(packet: &DiscoveryPacket) -> Vec<u8> {
    let mut builder = PacketBuilder::new();
    builder.write_i32(packet.packet_type().ordinal());

    if let DiscoveryPacket::ServerSearchResponse(response) = packet {
        builder.write_i32(i32::from(response.control_port));
        match &response.audio {
            Some(audio) => {
                builder
                    .write_bool(true)
                    .write_i32(i32::from(audio.port))
                    .write_format(&audio.format);
            }
            None => {
                builder.write_bool(false);
            }
        }
        builder.write_bytes(response.verification.as_bytes());
    }

    builder.build()
}

/// Parses a discovery packet.
///
/// Trailing bytes after the last known field are ignored.
///
/// # Errors
///
/// - [`ProtocolError::ProtocolMismatch`] for a missing or foreign prefix.
/// - [`ProtocolError::UnknownPacketType`] for an ordinal not in the table.
/// - [`ProtocolError::InsufficientData`] / [`ProtocolError::MalformedPayload`]
///   for a truncated or out-of-range body.
pub fn decode_packet(bytes: &[u8]) -> Result<DiscoveryPacket, ProtocolError> {
    let mut reader = PacketReader::new(bytes)?;
    match PacketType::try_from(reader.read_i32()?)? {
        PacketType::ServerSearch => Ok(DiscoveryPacket::ServerSearch),
        PacketType::ServerSearchResponse => {
            decode_response(&mut reader).map(DiscoveryPacket::ServerSearchResponse)
        }
    }
}

fn decode_response(reader: &mut PacketReader<'_>) -> Result<ServerSearchResponse, ProtocolError> {
    let control_port = reader.read_port()?;
    let audio = if reader.read_bool()? {
        let port = reader.read_port()?;
        let format = reader.read_format()?;
        Some(AdvertisedAudio { port, format })
    } else {
        None
    };
    let verification = EncryptionVerification::from_bytes(reader.read_bytes()?);
    Ok(ServerSearchResponse {
        control_port,
        audio,
        verification,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
