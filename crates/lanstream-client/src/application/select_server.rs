//! ServerSelector: decides which discovered server the client listens to.
//!
//! A server is *playable* when its verification token opens with the
//! client's secret and it currently advertises an audio endpoint.  The
//! selector is fed the browser's full server list on every change and
//! reports whether the client should (re)connect, keep going, or give up.

use std::net::SocketAddr;

use lanstream_core::{Encryption, RemoteServerRecord};

/// Outcome of feeding a new server list to [`ServerSelector::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Keep doing what you are doing.
    Unchanged,
    /// Connect to this server.  Also returned when the current server moved
    /// its audio endpoint or changed format.
    Switched(RemoteServerRecord),
    /// The current server is no longer playable and nothing replaces it.
    Lost,
}

/// Servers from `records` that `encryption` can talk to and that stream
/// audio, in the order given.
pub fn playable_servers(records: &[RemoteServerRecord], encryption: Option<&Encryption>) -> Vec<RemoteServerRecord> {
    records
        .iter()
        .filter(|record| record.has_audio() && record.is_compatible(encryption))
        .cloned()
        .collect()
}

/// Tracks the chosen server across discovery updates.
#[derive(Debug)]
pub struct ServerSelector {
    encryption: Option<Encryption>,
    /// Control address to prefer over the first playable server.
    preferred: Option<SocketAddr>,
    current: Option<RemoteServerRecord>,
}

impl ServerSelector {
    pub fn new(encryption: Option<Encryption>, preferred: Option<SocketAddr>) -> Self {
        Self {
            encryption,
            preferred,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&RemoteServerRecord> {
        self.current.as_ref()
    }

    pub fn encryption(&self) -> Option<&Encryption> {
        self.encryption.as_ref()
    }

    /// Forgets the current server so the next [`update`](Self::update) picks
    /// afresh.  Call this when the audio stream ended on its own.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Reconciles the selection with the latest server list.
    ///
    /// The current server is kept while it stays playable.  Otherwise the
    /// preferred server wins if playable, then the first playable one.  With
    /// a preference set, no other server is ever chosen.
    pub fn update(&mut self, records: &[RemoteServerRecord]) -> Selection {
        let playable = playable_servers(records, self.encryption.as_ref());

        if let Some(current) = &self.current {
            if let Some(same) = playable
                .iter()
                .find(|record| record.control_address == current.control_address)
            {
                if same.audio == current.audio {
                    return Selection::Unchanged;
                }
                self.current = Some(same.clone());
                return Selection::Switched(same.clone());
            }
        }

        let next = match self.preferred {
            Some(preferred) => playable.into_iter().find(|record| record.control_address == preferred),
            None => playable.into_iter().next(),
        };
        match (next, self.current.is_some()) {
            (Some(record), _) => {
                self.current = Some(record.clone());
                Selection::Switched(record)
            }
            (None, true) => {
                self.current = None;
                Selection::Lost
            }
            (None, false) => Selection::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use lanstream_core::{AdvertisedAudio, AudioFormat, EncryptionVerification, ServerSearchResponse};

    fn record(last: u8, audio_port: Option<u16>, secret: Option<&str>) -> RemoteServerRecord {
        let encryption = secret.map(Encryption::from_passphrase);
        let response = ServerSearchResponse {
            control_port: 8000,
            audio: audio_port.map(|port| AdvertisedAudio {
                port,
                format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
            }),
            verification: EncryptionVerification::new(encryption.as_ref()).unwrap(),
        };
        RemoteServerRecord::from_response(IpAddr::from([10, 0, 0, last]), &response)
    }

    fn swordfish() -> Option<Encryption> {
        Some(Encryption::from_passphrase("swordfish"))
    }

    // ── playable_servers ──────────────────────────────────────────────────────

    #[test]
    fn test_playable_servers_excludes_silent_and_incompatible_servers() {
        // Arrange
        let records = vec![
            record(1, Some(9000), Some("swordfish")),
            record(2, None, Some("swordfish")),
            record(3, Some(9000), Some("marlin")),
            record(4, Some(9000), None),
        ];

        // Act
        let playable = playable_servers(&records, swordfish().as_ref());

        // Assert
        assert_eq!(playable.len(), 1);
        assert_eq!(playable[0].control_address, "10.0.0.1:8000".parse().unwrap());
    }

    #[test]
    fn test_plaintext_client_plays_only_plaintext_servers() {
        let records = vec![record(1, Some(9000), Some("swordfish")), record(2, Some(9000), None)];

        let playable = playable_servers(&records, None);

        assert_eq!(playable.len(), 1);
        assert_eq!(playable[0].control_address.ip(), IpAddr::from([10, 0, 0, 2]));
    }

    // ── ServerSelector ────────────────────────────────────────────────────────

    #[test]
    fn test_first_playable_server_is_selected() {
        let mut selector = ServerSelector::new(None, None);

        let selection = selector.update(&[record(1, None, None), record(2, Some(9000), None)]);

        assert_eq!(selection, Selection::Switched(record(2, Some(9000), None)));
        assert_eq!(selector.current(), Some(&record(2, Some(9000), None)));
    }

    #[test]
    fn test_current_server_is_kept_when_another_appears() {
        // Arrange
        let mut selector = ServerSelector::new(None, None);
        selector.update(&[record(5, Some(9000), None)]);

        // Act
        let selection = selector.update(&[record(1, Some(9000), None), record(5, Some(9000), None)]);

        // Assert
        assert_eq!(selection, Selection::Unchanged);
        assert_eq!(selector.current().unwrap().control_address.ip(), IpAddr::from([10, 0, 0, 5]));
    }

    #[test]
    fn test_moved_audio_endpoint_switches_to_new_endpoint() {
        let mut selector = ServerSelector::new(None, None);
        selector.update(&[record(1, Some(9000), None)]);

        let selection = selector.update(&[record(1, Some(9100), None)]);

        let Selection::Switched(moved) = selection else {
            panic!("expected a switch, got {selection:?}");
        };
        assert_eq!(moved.audio.unwrap().address.port(), 9100);
    }

    #[test]
    fn test_server_that_stops_streaming_is_lost() {
        // Arrange
        let mut selector = ServerSelector::new(None, None);
        selector.update(&[record(1, Some(9000), None)]);

        // Act
        let selection = selector.update(&[record(1, None, None)]);

        // Assert
        assert_eq!(selection, Selection::Lost);
        assert!(selector.current().is_none());
    }

    #[test]
    fn test_lost_server_is_replaced_when_another_is_playable() {
        let mut selector = ServerSelector::new(None, None);
        selector.update(&[record(1, Some(9000), None)]);

        let selection = selector.update(&[record(2, Some(9000), None)]);

        assert_eq!(selection, Selection::Switched(record(2, Some(9000), None)));
    }

    #[test]
    fn test_preferred_server_wins_and_others_are_ignored() {
        // Arrange
        let preferred: SocketAddr = "10.0.0.7:8000".parse().unwrap();
        let mut selector = ServerSelector::new(None, Some(preferred));

        // Act / Assert: only a non-preferred server is around.
        assert_eq!(selector.update(&[record(1, Some(9000), None)]), Selection::Unchanged);

        // The preferred one shows up later.
        let selection = selector.update(&[record(1, Some(9000), None), record(7, Some(9000), None)]);
        assert_eq!(selection, Selection::Switched(record(7, Some(9000), None)));
    }

    #[test]
    fn test_nothing_playable_and_nothing_selected_is_unchanged() {
        let mut selector = ServerSelector::new(swordfish(), None);

        assert_eq!(selector.update(&[record(1, Some(9000), Some("marlin"))]), Selection::Unchanged);
        assert_eq!(selector.update(&[]), Selection::Unchanged);
    }

    #[test]
    fn test_clear_allows_reselecting_same_server() {
        let mut selector = ServerSelector::new(None, None);
        let records = [record(1, Some(9000), None)];
        selector.update(&records);

        selector.clear();

        assert_eq!(selector.update(&records), Selection::Switched(record(1, Some(9000), None)));
    }
}
