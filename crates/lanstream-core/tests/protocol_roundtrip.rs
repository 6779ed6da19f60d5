//! Integration tests for the lanstream-core public API.
//!
//! These tests walk a search/response exchange through the codec, the
//! verification token and the registry exactly as the discovery crate does,
//! but without any sockets.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use lanstream_core::{
    decode_packet, encode_packet, AdvertisedAudio, AudioFormat, DiscoveryPacket, Encryption,
    EncryptionVerification, PacketReader, ProtocolError, RegistryChange, RemoteServerRecord,
    RemoteServerRegistry, ServerSearchResponse,
};

fn swordfish_response() -> ServerSearchResponse {
    let enc = Encryption::from_passphrase("swordfish");
    ServerSearchResponse {
        control_port: 8000,
        audio: Some(AdvertisedAudio {
            port: 9000,
            format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
        }),
        verification: EncryptionVerification::new(Some(&enc)).expect("token"),
    }
}

#[test]
fn test_search_response_populates_registry() {
    // Arrange: the server side encodes and seals its answer.
    let enc = Encryption::from_passphrase("swordfish");
    let wire = enc
        .encrypt(&encode_packet(&DiscoveryPacket::ServerSearchResponse(swordfish_response())))
        .expect("seal");
    let sender: IpAddr = "192.168.1.40".parse().unwrap();

    // Act: the client side opens, decodes and records it.
    let plain = enc.decrypt(&wire).expect("open");
    let DiscoveryPacket::ServerSearchResponse(response) = decode_packet(&plain).expect("decode")
    else {
        panic!("expected a search response");
    };
    let mut registry = RemoteServerRegistry::new();
    let change = registry.upsert(RemoteServerRecord::from_response(sender, &response));

    // Assert
    assert_eq!(change, RegistryChange::Inserted);
    let records = registry.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.control_address.port(), 8000);
    assert_eq!(record.audio.as_ref().map(|a| a.address.port()), Some(9000));
    assert!(record.is_compatible(Some(&Encryption::from_passphrase("swordfish"))));
    assert!(!record.is_compatible(Some(&Encryption::from_passphrase("marlin"))));
    assert!(!record.is_compatible(None));
}

#[test]
fn test_response_under_wrong_secret_never_reaches_decoder() {
    let sealed = Encryption::from_passphrase("swordfish")
        .encrypt(&encode_packet(&DiscoveryPacket::ServerSearch))
        .unwrap();
    assert!(Encryption::from_passphrase("marlin").decrypt(&sealed).is_err());
}

#[test]
fn test_sealed_bytes_fed_to_decoder_are_protocol_mismatch() {
    // A listener with no secret configured receives an encrypted datagram.
    let sealed = Encryption::from_passphrase("swordfish")
        .encrypt(&encode_packet(&DiscoveryPacket::ServerSearch))
        .unwrap();
    assert!(matches!(
        decode_packet(&sealed),
        Err(ProtocolError::ProtocolMismatch)
    ));
}

#[test]
fn test_corrupted_prefix_fails_before_any_field() {
    let mut bytes = encode_packet(&DiscoveryPacket::ServerSearchResponse(swordfish_response()));
    bytes[2] = b'X';
    assert!(matches!(
        PacketReader::new(&bytes),
        Err(ProtocolError::ProtocolMismatch)
    ));
    assert!(matches!(
        decode_packet(&bytes),
        Err(ProtocolError::ProtocolMismatch)
    ));
}

#[test]
fn test_registry_evicts_server_that_stops_answering() {
    // Arrange
    let t0 = Instant::now();
    let sender: IpAddr = "192.168.1.40".parse().unwrap();
    let record = RemoteServerRecord::from_response(sender, &swordfish_response());
    let mut registry = RemoteServerRegistry::new();

    // Act: answered at t0 and t0+1s, then silence.
    registry.upsert_at(record.clone(), t0);
    registry.upsert_at(record, t0 + Duration::from_secs(1));
    let early = registry.sweep_stale(t0 + Duration::from_secs(5), Duration::from_secs(5));
    let late = registry.sweep_stale(t0 + Duration::from_secs(7), Duration::from_secs(5));

    // Assert
    assert!(early.is_empty());
    assert_eq!(late.len(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_audio_stop_is_an_update_not_a_new_server() {
    let sender: IpAddr = "192.168.1.40".parse().unwrap();
    let mut registry = RemoteServerRegistry::new();
    registry.upsert(RemoteServerRecord::from_response(sender, &swordfish_response()));

    let mut idle = swordfish_response();
    idle.audio = None;
    let change = registry.upsert(RemoteServerRecord::from_response(sender, &idle));

    assert_eq!(change, RegistryChange::Updated);
    assert_eq!(registry.len(), 1);
    assert!(!registry.records()[0].has_audio());
}
