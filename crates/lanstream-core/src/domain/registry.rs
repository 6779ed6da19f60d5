//! In-memory table of discovered servers.
//!
//! Records are keyed by control address.  Every response replaces the
//! previous record for its key wholesale and refreshes its "last seen" time;
//! [`RemoteServerRegistry::sweep_stale`] evicts records that have not been
//! refreshed within the staleness window.  Nothing here is persisted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::crypto::cipher::Encryption;
use crate::domain::server::RemoteServerRecord;

/// Outcome of [`RemoteServerRegistry::upsert_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// First response from this control address.
    Inserted,
    /// Known server whose record content changed (e.g. audio started).
    Updated,
    /// Known server, identical record; only the timestamp moved.
    Unchanged,
}

#[derive(Debug, Clone)]
struct Entry {
    record: RemoteServerRecord,
    last_seen: Instant,
}

/// Discovered servers keyed by control address.
#[derive(Debug, Default)]
pub struct RemoteServerRegistry {
    entries: HashMap<SocketAddr, Entry>,
}

impl RemoteServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `record`, stamping it with the current time.
    pub fn upsert(&mut self, record: RemoteServerRecord) -> RegistryChange {
        self.upsert_at(record, Instant::now())
    }

    /// Inserts or replaces `record`, stamping it with `now`.
    pub fn upsert_at(&mut self, record: RemoteServerRecord, now: Instant) -> RegistryChange {
        let key = record.control_address;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_seen = now;
                if entry.record == record {
                    RegistryChange::Unchanged
                } else {
                    debug!(server = %key, "Updated discovered server");
                    entry.record = record;
                    RegistryChange::Updated
                }
            }
            None => {
                debug!(server = %key, audio = record.has_audio(), "Discovered server");
                self.entries.insert(key, Entry { record, last_seen: now });
                RegistryChange::Inserted
            }
        }
    }

    /// Removes every record last seen more than `window` before `now` and
    /// returns the evicted records.
    pub fn sweep_stale(&mut self, now: Instant, window: Duration) -> Vec<RemoteServerRecord> {
        let stale: Vec<SocketAddr> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > window)
            .map(|(key, _)| *key)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(entry) = self.entries.remove(&key) {
                debug!(server = %key, "Evicted stale server");
                evicted.push(entry.record);
            }
        }
        evicted
    }

    pub fn get(&self, control_address: &SocketAddr) -> Option<&RemoteServerRecord> {
        self.entries.get(control_address).map(|entry| &entry.record)
    }

    pub fn remove(&mut self, control_address: &SocketAddr) -> Option<RemoteServerRecord> {
        self.entries.remove(control_address).map(|entry| entry.record)
    }

    /// Snapshot of all records, ordered by control address.
    pub fn records(&self) -> Vec<RemoteServerRecord> {
        let mut records: Vec<RemoteServerRecord> =
            self.entries.values().map(|entry| entry.record.clone()).collect();
        records.sort_by_key(|record| record.control_address);
        records
    }

    /// Snapshot of the records whose verification token `encryption` opens.
    pub fn compatible(&self, encryption: Option<&Encryption>) -> Vec<RemoteServerRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.is_compatible(encryption))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verification::EncryptionVerification;
    use crate::domain::server::RemoteAudioEndpoint;
    use crate::protocol::format::AudioFormat;

    const WINDOW: Duration = Duration::from_secs(5);

    fn record(addr: &str, audio_port: Option<u16>) -> RemoteServerRecord {
        let control_address: SocketAddr = addr.parse().unwrap();
        RemoteServerRecord {
            control_address,
            audio: audio_port.map(|port| RemoteAudioEndpoint {
                address: SocketAddr::new(control_address.ip(), port),
                format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
            }),
            verification: EncryptionVerification::new(None).unwrap(),
        }
    }

    #[test]
    fn test_first_upsert_inserts() {
        let mut registry = RemoteServerRegistry::new();
        let change = registry.upsert(record("10.0.0.1:8000", None));
        assert_eq!(change, RegistryChange::Inserted);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identical_upsert_is_unchanged() {
        let mut registry = RemoteServerRegistry::new();
        registry.upsert(record("10.0.0.1:8000", Some(9000)));
        let change = registry.upsert(record("10.0.0.1:8000", Some(9000)));
        assert_eq!(change, RegistryChange::Unchanged);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_changed_record_replaces_previous() {
        // Arrange
        let mut registry = RemoteServerRegistry::new();
        registry.upsert(record("10.0.0.1:8000", None));

        // Act
        let change = registry.upsert(record("10.0.0.1:8000", Some(9000)));

        // Assert
        assert_eq!(change, RegistryChange::Updated);
        let stored = registry.get(&"10.0.0.1:8000".parse().unwrap()).unwrap();
        assert!(stored.has_audio());
    }

    #[test]
    fn test_same_host_different_control_port_are_distinct() {
        let mut registry = RemoteServerRegistry::new();
        registry.upsert(record("10.0.0.1:8000", None));
        registry.upsert(record("10.0.0.1:8001", None));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_sweep_keeps_fresh_and_evicts_stale() {
        // Arrange
        let t0 = Instant::now();
        let mut registry = RemoteServerRegistry::new();
        registry.upsert_at(record("10.0.0.1:8000", None), t0);
        registry.upsert_at(record("10.0.0.2:8000", None), t0 + Duration::from_secs(4));

        // Act
        let evicted = registry.sweep_stale(t0 + Duration::from_secs(6), WINDOW);

        // Assert
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].control_address, "10.0.0.1:8000".parse().unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_refresh_postpones_eviction() {
        let t0 = Instant::now();
        let mut registry = RemoteServerRegistry::new();
        registry.upsert_at(record("10.0.0.1:8000", None), t0);
        registry.upsert_at(record("10.0.0.1:8000", None), t0 + Duration::from_secs(4));

        let evicted = registry.sweep_stale(t0 + Duration::from_secs(8), WINDOW);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_sweep_at_exact_window_keeps_record() {
        let t0 = Instant::now();
        let mut registry = RemoteServerRegistry::new();
        registry.upsert_at(record("10.0.0.1:8000", None), t0);
        assert!(registry.sweep_stale(t0 + WINDOW, WINDOW).is_empty());
    }

    #[test]
    fn test_records_are_sorted_by_control_address() {
        let mut registry = RemoteServerRegistry::new();
        registry.upsert(record("10.0.0.9:8000", None));
        registry.upsert(record("10.0.0.1:8000", None));
        registry.upsert(record("10.0.0.5:8000", None));

        let addrs: Vec<String> = registry
            .records()
            .iter()
            .map(|r| r.control_address.to_string())
            .collect();
        assert_eq!(addrs, vec!["10.0.0.1:8000", "10.0.0.5:8000", "10.0.0.9:8000"]);
    }

    #[test]
    fn test_compatible_filters_by_secret() {
        // Arrange
        let enc = Encryption::from_passphrase("swordfish");
        let mut registry = RemoteServerRegistry::new();
        registry.upsert(record("10.0.0.1:8000", None));
        let mut sealed = record("10.0.0.2:8000", Some(9000));
        sealed.verification = EncryptionVerification::new(Some(&enc)).unwrap();
        registry.upsert(sealed);

        // Act / Assert
        assert_eq!(registry.compatible(Some(&enc)).len(), 1);
        assert_eq!(registry.compatible(None).len(), 1);
        assert!(registry
            .compatible(Some(&Encryption::from_passphrase("marlin")))
            .is_empty());
    }
}
