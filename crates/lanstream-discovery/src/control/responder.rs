//! Answers `SERVER_SEARCH` with this host's advertisement.
//!
//! The responder keeps the current advertisement (control port, optional
//! audio endpoint, verification token) behind a lock so the owning service
//! can change it while the transport's receive thread is answering.  The
//! token is rebuilt only when the secret changes, not per response.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use lanstream_core::{
    decode_packet, encode_packet, AdvertisedAudio, DiscoveryPacket, Encryption,
    EncryptionVerification, ServerSearchResponse,
};
use tracing::debug;

use super::ControlError;
use crate::transport::{Datagram, DatagramListener, DatagramSink, ListenerError, Target};

/// Discovery listener that replies to searches.
#[derive(Debug)]
pub struct ControlResponder {
    advertisement: RwLock<ServerSearchResponse>,
}

impl ControlResponder {
    /// Creates a responder advertising `control_port` and no audio.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Token`] if the verification token cannot be
    /// sealed.
    pub fn new(control_port: u16, encryption: Option<&Encryption>) -> Result<Self, ControlError> {
        Ok(Self {
            advertisement: RwLock::new(ServerSearchResponse {
                control_port,
                audio: None,
                verification: EncryptionVerification::new(encryption)?,
            }),
        })
    }

    /// Advertises (or withdraws) the audio endpoint.
    pub fn set_audio(&self, audio: Option<AdvertisedAudio>) {
        debug!(audio_port = audio.as_ref().map(|a| a.port), "Advertisement audio changed");
        self.write().audio = audio;
    }

    pub fn set_control_port(&self, control_port: u16) {
        self.write().control_port = control_port;
    }

    /// Rebuilds the verification token for a new secret.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Token`] if sealing fails; the old token stays.
    pub fn set_encryption(&self, encryption: Option<&Encryption>) -> Result<(), ControlError> {
        let verification = EncryptionVerification::new(encryption)?;
        self.write().verification = verification;
        Ok(())
    }

    /// Snapshot of the current advertisement.
    pub fn response(&self) -> ServerSearchResponse {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, ServerSearchResponse> {
        self.advertisement.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerSearchResponse> {
        self.advertisement.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DatagramListener for ControlResponder {
    fn on_datagram(&self, datagram: &Datagram<'_>, sink: &dyn DatagramSink) -> Result<(), ListenerError> {
        match decode_packet(datagram.payload)? {
            DiscoveryPacket::ServerSearch => {
                debug!(source = %datagram.source, "Answering server search");
                let reply = encode_packet(&DiscoveryPacket::ServerSearchResponse(self.response()));
                sink.send(&reply, Target::Host(datagram.source.ip()))?;
            }
            // Other servers' answers, seen because the group is shared.
            DiscoveryPacket::ServerSearchResponse(_) => {}
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use lanstream_core::AudioFormat;

    use crate::transport::TransportError;

    #[derive(Default)]
    struct CapturingSink {
        sent: Mutex<Vec<(Vec<u8>, Target)>>,
    }

    impl DatagramSink for CapturingSink {
        fn send(&self, payload: &[u8], target: Target) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((payload.to_vec(), target));
            Ok(())
        }
    }

    fn search_from(source: &str) -> (Vec<u8>, std::net::SocketAddr) {
        (encode_packet(&DiscoveryPacket::ServerSearch), source.parse().unwrap())
    }

    #[test]
    fn test_search_gets_unicast_reply_with_advertisement() {
        // Arrange
        let responder = ControlResponder::new(8000, None).unwrap();
        responder.set_audio(Some(AdvertisedAudio {
            port: 9000,
            format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
        }));
        let sink = CapturingSink::default();
        let (payload, source) = search_from("192.168.1.77:51234");

        // Act
        responder
            .on_datagram(&Datagram { source, payload: &payload }, &sink)
            .unwrap();

        // Assert
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Target::Host(source.ip()));
        let DiscoveryPacket::ServerSearchResponse(response) = decode_packet(&sent[0].0).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.control_port, 8000);
        assert_eq!(response.audio.map(|a| a.port), Some(9000));
    }

    #[test]
    fn test_other_servers_responses_are_ignored() {
        let responder = ControlResponder::new(8000, None).unwrap();
        let sink = CapturingSink::default();
        let payload = encode_packet(&DiscoveryPacket::ServerSearchResponse(responder.response()));
        let source = "192.168.1.78:45210".parse().unwrap();

        responder
            .on_datagram(&Datagram { source, payload: &payload }, &sink)
            .unwrap();

        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_foreign_bytes_are_protocol_error() {
        let responder = ControlResponder::new(8000, None).unwrap();
        let sink = CapturingSink::default();
        let source = "192.168.1.78:45210".parse().unwrap();

        let result = responder.on_datagram(&Datagram { source, payload: b"GET / HTTP/1.1" }, &sink);

        assert!(matches!(result, Err(ListenerError::Protocol(_))));
    }

    #[test]
    fn test_set_encryption_rebuilds_token() {
        // Arrange
        let responder = ControlResponder::new(8000, None).unwrap();
        assert!(responder.response().verification.is_plaintext());
        let enc = Encryption::from_passphrase("swordfish");

        // Act
        responder.set_encryption(Some(&enc)).unwrap();

        // Assert
        let token = responder.response().verification;
        assert!(token.matches_encryption(Some(&enc)));
        assert!(!token.matches_encryption(None));
    }

    #[test]
    fn test_withdrawing_audio_clears_endpoint() {
        let responder = ControlResponder::new(8000, None).unwrap();
        responder.set_audio(Some(AdvertisedAudio {
            port: 9000,
            format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
        }));
        responder.set_audio(None);
        assert!(responder.response().audio.is_none());
    }
}
