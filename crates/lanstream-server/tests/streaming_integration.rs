//! Integration tests for the streaming server.
//!
//! # Purpose
//!
//! These tests drive the server crate through its public API the way the
//! binary does.  They verify:
//!
//! - Every connected listener receives the same bytes, in capture order.
//! - The start/stop state machine rejects misuse and really stops.
//! - A listener that never reads does not hold back the others, under
//!   either overflow policy.
//! - A client can go from a discovery search to a live audio stream.
//!
//! The capture device is a [`MockCaptureDevice`] so each test controls
//! exactly which bytes are "captured" and when.

use std::io::Read;
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lanstream_core::{AudioFormat, Encryption};
use lanstream_discovery::{BrowserConfig, DatagramTransport, LoopbackNetwork, ServerBrowser};
use lanstream_server::application::stream_service::{StreamService, StreamSettings};
use lanstream_server::infrastructure::audio_capture::capture_loop::CaptureLoop;
use lanstream_server::infrastructure::audio_capture::fanout::{FanOutBuffer, OverflowPolicy};
use lanstream_server::infrastructure::audio_capture::mock::MockCaptureDevice;
use lanstream_server::infrastructure::audio_capture::share_device;
use lanstream_server::infrastructure::network::audio_server::{
    AudioServer, AudioServerConfig, ServerError, UsageError,
};

const CHUNK: usize = 256;

fn config() -> AudioServerConfig {
    AudioServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
        chunk_size: CHUNK,
        buffer_chunks: 64,
        overflow: OverflowPolicy::DropOldest,
    }
}

/// A recognisable chunk: every byte derives from the chunk index.
fn chunk(index: usize) -> Vec<u8> {
    (0..CHUNK).map(|i| (index * 31 + i) as u8).collect()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to audio server");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    stream
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

/// Two listeners connected before capture begins see byte-identical streams
/// equal to what the device produced.
#[test]
fn test_two_clients_receive_identical_chunk_sequences() {
    // Arrange
    let mock = MockCaptureDevice::new();
    let (server, _events) = AudioServer::with_device(config(), Box::new(mock.clone()));
    let addr = server.start().expect("start");
    let mut first = connect(addr);
    let mut second = connect(addr);
    assert!(wait_for(|| server.connection_count() == 2));

    // Act
    let expected: Vec<u8> = (0..32).flat_map(chunk).collect();
    for i in 0..32 {
        mock.push_data(chunk(i));
    }

    // Assert
    let mut got_first = vec![0u8; expected.len()];
    let mut got_second = vec![0u8; expected.len()];
    first.read_exact(&mut got_first).expect("first client stream");
    second.read_exact(&mut got_second).expect("second client stream");
    assert_eq!(got_first, expected);
    assert_eq!(got_second, expected);
}

/// A buffer nobody drains fills to its own capacity and then drops, while a
/// drained buffer attached to the same capture loop receives every chunk.
#[test]
fn test_stalled_listener_does_not_starve_others() {
    // Arrange
    let mock = MockCaptureDevice::new();
    let (mut capture, _failures) = CaptureLoop::start(
        share_device(Box::new(mock.clone())),
        &config().format,
        CHUNK,
    )
    .expect("capture loop");
    let tap = capture.tap();
    let stalled = tap.attach(Arc::new(FanOutBuffer::new(4 * CHUNK, OverflowPolicy::DropOldest)));
    let live = tap.attach(Arc::new(FanOutBuffer::new(4 * CHUNK, OverflowPolicy::DropOldest)));

    // Act / Assert: feed one chunk at a time and drain only `live`.
    let mut out = vec![0u8; CHUNK];
    for i in 0..50 {
        mock.push_data(chunk(i));
        assert!(
            live.pop_timeout(&mut out, Duration::from_secs(3)).expect("live buffer open"),
            "live listener stalled at chunk {i}"
        );
        assert_eq!(out, chunk(i));
    }
    assert!(stalled.len() <= stalled.capacity());
    assert_eq!(stalled.dropped_bytes(), (46 * CHUNK) as u64);
    capture.stop();
}

/// Under the grace policy a stalled listener overflows without ever making
/// the capture loop wait, so a drained listener keeps up with the capture
/// cadence chunk by chunk.
#[test]
fn test_stalled_grace_listener_does_not_slow_others() {
    // Arrange
    let grace = OverflowPolicy::Grace {
        max_wait: Duration::from_millis(200),
    };
    let mock = MockCaptureDevice::new();
    let (mut capture, _failures) = CaptureLoop::start(
        share_device(Box::new(mock.clone())),
        &config().format,
        CHUNK,
    )
    .expect("capture loop");
    let tap = capture.tap();
    let stalled = tap.attach(Arc::new(FanOutBuffer::new(2 * CHUNK, grace)));
    let live = tap.attach(Arc::new(FanOutBuffer::new(64 * CHUNK, grace)));

    // Act / Assert: one chunk every 5 ms; each must reach `live` well inside
    // the grace period a blocking producer would spend on `stalled`.
    let started = Instant::now();
    let mut out = vec![0u8; CHUNK];
    for i in 0..40 {
        mock.push_data(chunk(i));
        let asked = Instant::now();
        assert!(
            live.pop_timeout(&mut out, Duration::from_millis(150)).expect("live buffer open"),
            "live listener waited {:?} for chunk {i}",
            asked.elapsed()
        );
        assert_eq!(out, chunk(i));
        thread::sleep(Duration::from_millis(5));
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(stalled.len() <= 2 * stalled.capacity());
    assert!(stalled.dropped_bytes() > 0);
    capture.stop();
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[test]
fn test_starting_twice_is_a_usage_error() {
    let (server, _events) = AudioServer::with_device(config(), Box::new(MockCaptureDevice::new()));
    server.start().expect("first start");

    let second = server.start();

    assert!(matches!(second, Err(ServerError::Usage(UsageError::AlreadyRunning))));
}

#[test]
fn test_after_stop_server_is_not_running_and_refuses_clients() {
    // Arrange
    let (server, _events) = AudioServer::with_device(config(), Box::new(MockCaptureDevice::new()));
    let addr = server.start().expect("start");
    let mut existing = connect(addr);
    assert!(wait_for(|| server.connection_count() == 1));

    // Act
    server.stop().expect("stop");

    // Assert
    assert!(!server.is_running());
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());
    let mut rest = Vec::new();
    assert_eq!(existing.read_to_end(&mut rest).expect("clean close"), 0);
}

// ── End to end ────────────────────────────────────────────────────────────────

/// Discovery finds the server, the advertised endpoint accepts a connection,
/// and captured audio arrives.
#[test]
fn test_client_discovers_server_and_receives_audio() {
    // Arrange: server and client share the in-memory discovery network.
    let network = LoopbackNetwork::new();
    let secret = Encryption::from_passphrase("swordfish");
    let mock = MockCaptureDevice::new();
    let (service, _events) = StreamService::new(
        StreamSettings {
            control_addr: "127.0.0.1:0".parse().unwrap(),
            audio: config(),
            secret: Some("swordfish".to_string()),
        },
        Arc::new(network.join(IpAddr::from([127, 0, 0, 1]))),
        Box::new(mock.clone()),
    )
    .expect("service");
    service.start_audio().expect("audio");

    let client_transport = network.join(IpAddr::from([127, 0, 0, 2]));
    client_transport.set_encryption(Some(secret.clone()));
    let (browser, _browser_events) = ServerBrowser::start(
        Arc::new(client_transport),
        BrowserConfig {
            search_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(2),
        },
    )
    .expect("browser");

    // Act
    assert!(wait_for(|| !browser.compatible_servers(Some(&secret)).is_empty()));
    let record = browser.compatible_servers(Some(&secret)).remove(0);
    let endpoint = record.audio.expect("audio endpoint advertised");
    assert!(endpoint.format.matches(&config().format));
    let mut stream = connect(endpoint.address);
    assert!(wait_for(|| service.audio().connection_count() == 1));
    mock.push_data(chunk(7));

    // Assert
    let mut received = vec![0u8; CHUNK];
    stream.read_exact(&mut received).expect("audio bytes");
    assert_eq!(received, chunk(7));
}
