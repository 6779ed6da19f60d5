//! Integration tests for discovery: responder + browser over a transport.
//!
//! The in-memory loopback network applies the same sealing and dispatch as
//! the multicast transport, so these scenarios run anywhere.  The one test
//! that needs a real multicast route is ignored by default.

use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lanstream_core::{AdvertisedAudio, AudioFormat, Encryption};
use lanstream_discovery::{
    BrowserConfig, ControlResponder, DatagramTransport, LoopbackNetwork, LoopbackTransport, MulticastConfig,
    MulticastTransport, ServerBrowser,
};

fn ip(last: u8) -> IpAddr {
    IpAddr::from([192, 168, 1, last])
}

fn fast() -> BrowserConfig {
    BrowserConfig {
        search_interval: Duration::from_millis(50),
        stale_after: Duration::from_millis(500),
    }
}

fn wait_until(mut condition: impl FnMut() -> bool, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A server advertising control 8000 and PCM 44.1 kHz / 16-bit / mono on 9000.
fn swordfish_server(network: &LoopbackNetwork, secret: &Encryption) -> LoopbackTransport {
    let transport = network.join(ip(10));
    transport.set_encryption(Some(secret.clone()));
    let responder = ControlResponder::new(8000, Some(secret)).expect("responder");
    responder.set_audio(Some(AdvertisedAudio {
        port: 9000,
        format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
    }));
    transport.add_listener(Arc::new(responder));
    transport
}

#[test]
fn test_search_finds_swordfish_server_with_audio_on_9000() {
    // Arrange
    let network = LoopbackNetwork::new();
    let secret = Encryption::from_passphrase("swordfish");
    let _server = swordfish_server(&network, &secret);
    let client = network.join(ip(20));
    client.set_encryption(Some(secret.clone()));

    // Act
    let (browser, _events) = ServerBrowser::start(Arc::new(client), fast()).expect("browser");
    let found = wait_until(|| !browser.servers().is_empty(), Duration::from_secs(3));

    // Assert
    assert!(found, "server never answered");
    let servers = browser.servers();
    assert_eq!(servers.len(), 1);
    let record = &servers[0];
    assert_eq!(record.control_address, "192.168.1.10:8000".parse().unwrap());
    let audio = record.audio.as_ref().expect("audio endpoint advertised");
    assert_eq!(audio.address.port(), 9000);
    assert_eq!(audio.format, AudioFormat::pcm_signed(44_100.0, 16, 1, false));
    assert!(record.verification.matches_encryption(Some(&secret)));
    assert!(!record
        .verification
        .matches_encryption(Some(&Encryption::from_passphrase("marlin"))));
    assert!(!record.verification.matches_encryption(None));
}

#[test]
fn test_wrong_secret_yields_no_servers() {
    // Arrange
    let network = LoopbackNetwork::new();
    let _server = swordfish_server(&network, &Encryption::from_passphrase("swordfish"));
    let client = network.join(ip(20));
    let wrong = Encryption::from_passphrase("marlin");
    client.set_encryption(Some(wrong.clone()));

    // Act
    let (browser, _events) = ServerBrowser::start(Arc::new(client), fast()).expect("browser");
    thread::sleep(Duration::from_millis(300));

    // Assert: not an error, just nothing compatible.
    assert!(browser.servers().is_empty());
    assert!(browser.compatible_servers(Some(&wrong)).is_empty());
}

#[test]
fn test_unencrypted_client_sees_no_encrypted_server() {
    let network = LoopbackNetwork::new();
    let _server = swordfish_server(&network, &Encryption::from_passphrase("swordfish"));
    let client = network.join(ip(20));

    let (browser, _events) = ServerBrowser::start(Arc::new(client), fast()).expect("browser");
    thread::sleep(Duration::from_millis(300));

    assert!(browser.servers().is_empty());
}

#[test]
fn test_audio_withdrawal_reaches_browser() {
    // Arrange
    let network = LoopbackNetwork::new();
    let transport = network.join(ip(10));
    let responder = Arc::new(ControlResponder::new(8000, None).expect("responder"));
    responder.set_audio(Some(AdvertisedAudio {
        port: 9000,
        format: AudioFormat::pcm_signed(48_000.0, 16, 2, false),
    }));
    transport.add_listener(responder.clone());
    let (browser, _events) =
        ServerBrowser::start(Arc::new(network.join(ip(20))), fast()).expect("browser");
    assert!(wait_until(
        || browser.servers().first().is_some_and(|s| s.has_audio()),
        Duration::from_secs(3)
    ));

    // Act
    responder.set_audio(None);

    // Assert
    assert!(wait_until(
        || browser.servers().first().is_some_and(|s| !s.has_audio()),
        Duration::from_secs(3)
    ));
    assert_eq!(browser.servers().len(), 1);
}

#[test]
#[ignore = "requires a multicast-capable network interface with loopback routing"]
fn test_multicast_round_trip_on_real_interface() {
    // Arrange
    let secret = Encryption::from_passphrase("swordfish");
    let config = MulticastConfig {
        port: 45_299,
        ..MulticastConfig::default()
    };
    let server = Arc::new(MulticastTransport::new(config.clone()));
    server.set_encryption(Some(secret.clone()));
    server.add_listener(Arc::new(ControlResponder::new(8000, Some(&secret)).expect("responder")));
    server.open().expect("server transport");

    let client = Arc::new(MulticastTransport::new(config));
    client.set_encryption(Some(secret.clone()));
    client.open().expect("client transport");

    // Act
    let (browser, _events) = ServerBrowser::start(client.clone(), fast()).expect("browser");

    // Assert
    assert!(wait_until(|| !browser.servers().is_empty(), Duration::from_secs(5)));
    assert!(browser.servers()[0].verification.matches_encryption(Some(&secret)));

    drop(browser);
    client.close().expect("close client");
    server.close().expect("close server");
}
