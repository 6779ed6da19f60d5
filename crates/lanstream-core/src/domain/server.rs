//! Discovered server records.

use std::net::{IpAddr, SocketAddr};

use crate::crypto::cipher::Encryption;
use crate::crypto::verification::EncryptionVerification;
use crate::protocol::format::AudioFormat;
use crate::protocol::messages::ServerSearchResponse;

/// Where and in what format a remote server streams audio.
///
/// Two endpoints are equal when the addresses are identical and the formats
/// [`match`](AudioFormat::matches); a format that differs only in an
/// unspecified field does not count as a change.
#[derive(Debug, Clone)]
pub struct RemoteAudioEndpoint {
    pub address: SocketAddr,
    pub format: AudioFormat,
}

impl PartialEq for RemoteAudioEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.format.matches(&other.format)
    }
}

/// One row of the [`RemoteServerRegistry`](crate::RemoteServerRegistry).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteServerRecord {
    /// Sender address combined with the advertised control port.  This is
    /// the registry key.
    pub control_address: SocketAddr,
    /// `None` while the server is not streaming.
    pub audio: Option<RemoteAudioEndpoint>,
    pub verification: EncryptionVerification,
}

impl RemoteServerRecord {
    /// Builds a record from a response received from `sender`.
    ///
    /// The response only carries ports; the host of both the control and
    /// audio endpoints is the address the response came from.
    pub fn from_response(sender: IpAddr, response: &ServerSearchResponse) -> Self {
        Self {
            control_address: SocketAddr::new(sender, response.control_port),
            audio: response.audio.as_ref().map(|audio| RemoteAudioEndpoint {
                address: SocketAddr::new(sender, audio.port),
                format: audio.format.clone(),
            }),
            verification: response.verification.clone(),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// `true` when `encryption` can open this server's verification token.
    /// Purely local; nothing is sent.
    pub fn is_compatible(&self, encryption: Option<&Encryption>) -> bool {
        self.verification.matches_encryption(encryption)
    }
}
