//! Integration tests for the client against a real streaming server.
//!
//! # Purpose
//!
//! The server side runs the real `StreamService` with a scripted capture
//! device, on the in-memory discovery network.  The client side is what the
//! binary does: browse, select a playable server, receive its audio.
//! They verify:
//!
//! - A client with the right secret finds the server and hears its audio.
//! - A client with the wrong secret sees the server but never selects it.
//! - When the server stops streaming, the receive session ends cleanly and
//!   the selector reports the server as lost.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use lanstream_client::application::select_server::{Selection, ServerSelector};
use lanstream_client::infrastructure::network::audio_receiver::{
    AudioReceiver, StreamEnd, DEFAULT_CONNECT_TIMEOUT,
};
use lanstream_core::{AudioFormat, Encryption};
use lanstream_discovery::{
    BrowserConfig, BrowserEvent, DatagramTransport, LoopbackNetwork, ServerBrowser,
};
use lanstream_server::application::stream_service::{StreamService, StreamSettings};
use lanstream_server::infrastructure::audio_capture::fanout::OverflowPolicy;
use lanstream_server::infrastructure::audio_capture::mock::MockCaptureDevice;
use lanstream_server::infrastructure::network::audio_server::AudioServerConfig;
use tokio::sync::{mpsc, watch};

const CHUNK: usize = 128;

fn settings() -> StreamSettings {
    StreamSettings {
        control_addr: "127.0.0.1:0".parse().unwrap(),
        audio: AudioServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
            chunk_size: CHUNK,
            buffer_chunks: 32,
            overflow: OverflowPolicy::DropOldest,
        },
        secret: Some("swordfish".to_string()),
    }
}

fn fast() -> BrowserConfig {
    BrowserConfig {
        search_interval: Duration::from_millis(50),
        stale_after: Duration::from_secs(2),
    }
}

/// Feeds browser events to `selector` until it yields something other
/// than `Unchanged`.
async fn next_selection(
    events: &mut mpsc::UnboundedReceiver<BrowserEvent>,
    selector: &mut ServerSelector,
) -> Option<Selection> {
    let wait = async {
        while let Some(BrowserEvent::ServersChanged(records)) = events.recv().await {
            match selector.update(&records) {
                Selection::Unchanged => continue,
                other => return Some(other),
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.ok().flatten()
}

fn start_server(network: &LoopbackNetwork, mock: &MockCaptureDevice) -> StreamService {
    let (service, _events) = StreamService::new(
        settings(),
        Arc::new(network.join(IpAddr::from([127, 0, 0, 1]))),
        Box::new(mock.clone()),
    )
    .expect("stream service");
    service.start_audio().expect("audio server");
    service
}

async fn wait_for_listener(service: &StreamService) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while service.audio().connection_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn client_transport(network: &LoopbackNetwork, secret: &str) -> Arc<dyn DatagramTransport> {
    let transport = network.join(IpAddr::from([127, 0, 0, 2]));
    transport.set_encryption(Some(Encryption::from_passphrase(secret)));
    Arc::new(transport)
}

// ── Discovery to audio ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_selects_server_and_receives_captured_audio() {
    // Arrange
    let network = LoopbackNetwork::new();
    let mock = MockCaptureDevice::new();
    let service = start_server(&network, &mock);
    let (_browser, mut events) = ServerBrowser::start(client_transport(&network, "swordfish"), fast()).unwrap();
    let mut selector = ServerSelector::new(Some(Encryption::from_passphrase("swordfish")), None);

    // Act: discover and connect.
    let Some(Selection::Switched(record)) = next_selection(&mut events, &mut selector).await else {
        panic!("server was never selected");
    };
    let endpoint = record.audio.clone().expect("selected server streams audio");
    let receiver = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await.unwrap();
    let (running_tx, running) = watch::channel(true);
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        let summary = receiver.receive_into(&mut sink, running).await;
        (sink, summary)
    });

    // Capture only once the server has registered the listener.
    wait_for_listener(&service).await;
    let expected: Vec<u8> = (0..4 * CHUNK).map(|i| (i % 251) as u8).collect();
    for chunk in expected.chunks(CHUNK) {
        mock.push_data(chunk.to_vec());
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    running_tx.send(false).unwrap();

    // Assert
    let (sink, summary) = task.await.unwrap();
    let summary = summary.unwrap();
    assert_eq!(summary.end, StreamEnd::Shutdown);
    assert_eq!(sink, expected);
    assert_eq!(endpoint.format, settings().audio.format);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_secret_never_selects_server() {
    // Arrange: the transport opens with "swordfish" so responses are seen,
    // but the selector tests tokens against "marlin".
    let network = LoopbackNetwork::new();
    let mock = MockCaptureDevice::new();
    let _service = start_server(&network, &mock);
    let (browser, mut events) = ServerBrowser::start(client_transport(&network, "swordfish"), fast()).unwrap();
    let mut selector = ServerSelector::new(Some(Encryption::from_passphrase("marlin")), None);

    // Act
    let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    let Some(BrowserEvent::ServersChanged(records)) = first else {
        panic!("browser produced no server list");
    };

    // Assert
    assert_eq!(records.len(), 1);
    assert_eq!(selector.update(&records), Selection::Unchanged);
    assert!(selector.current().is_none());
    assert!(browser
        .compatible_servers(Some(&Encryption::from_passphrase("marlin")))
        .is_empty());
}

// ── Server going away ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopping_server_audio_ends_session_and_loses_selection() {
    // Arrange
    let network = LoopbackNetwork::new();
    let mock = MockCaptureDevice::new();
    let service = start_server(&network, &mock);
    let (_browser, mut events) = ServerBrowser::start(client_transport(&network, "swordfish"), fast()).unwrap();
    let mut selector = ServerSelector::new(Some(Encryption::from_passphrase("swordfish")), None);
    let Some(Selection::Switched(record)) = next_selection(&mut events, &mut selector).await else {
        panic!("server was never selected");
    };
    let receiver = AudioReceiver::connect(record.audio.as_ref().unwrap(), DEFAULT_CONNECT_TIMEOUT)
        .await
        .unwrap();
    let (_running_tx, running) = watch::channel(true);
    let task = tokio::spawn(async move {
        let mut sink = Vec::new();
        receiver.receive_into(&mut sink, running).await
    });

    wait_for_listener(&service).await;

    // Act: stop blocks until connection threads exit; the receive task
    // keeps running on the other worker.
    service.stop_audio().expect("stop audio");

    // Assert
    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session ends when the server stops")
        .unwrap()
        .unwrap();
    assert_eq!(summary.end, StreamEnd::ServerClosed);
    assert_eq!(next_selection(&mut events, &mut selector).await, Some(Selection::Lost));
}
