//! Client-side discovery: periodic search plus a self-pruning registry.
//!
//! [`ServerBrowser::start`] registers a response collector on the transport
//! and spawns a worker thread that, every search interval:
//!
//! 1. broadcasts `SERVER_SEARCH` to the group, and
//! 2. sweeps the registry for servers not heard from within the staleness
//!    window.
//!
//! Responses are recorded as they arrive, on the transport's receive thread.
//! Every insert, content change or eviction emits
//! [`BrowserEvent::ServersChanged`] with the full, sorted server list.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lanstream_core::{
    decode_packet, encode_packet, DiscoveryPacket, Encryption, RegistryChange, RemoteServerRecord,
    RemoteServerRegistry,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ControlError;
use crate::transport::{
    Datagram, DatagramListener, DatagramSink, DatagramTransport, ListenerError, Target, TransportError,
};

/// How often interested clients re-broadcast `SERVER_SEARCH`.
pub const DEFAULT_SEARCH_INTERVAL: Duration = Duration::from_secs(1);

/// Servers silent for longer than this are evicted.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// Granularity at which the worker notices a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Browser timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserConfig {
    pub search_interval: Duration,
    pub stale_after: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            search_interval: DEFAULT_SEARCH_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Notification sent to the browser's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    /// The set of known servers changed; carries the new full list.
    ServersChanged(Vec<RemoteServerRecord>),
}

/// State shared by the collector, the worker and the handle.
struct BrowserShared {
    registry: Mutex<RemoteServerRegistry>,
    events: mpsc::UnboundedSender<BrowserEvent>,
    running: AtomicBool,
}

impl BrowserShared {
    fn registry(&self) -> MutexGuard<'_, RemoteServerRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, records: Vec<RemoteServerRecord>) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(BrowserEvent::ServersChanged(records));
    }
}

/// Listener that records every search response into the registry.
struct ResponseCollector {
    shared: Arc<BrowserShared>,
}

impl DatagramListener for ResponseCollector {
    fn on_datagram(&self, datagram: &Datagram<'_>, _sink: &dyn DatagramSink) -> Result<(), ListenerError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let DiscoveryPacket::ServerSearchResponse(response) = decode_packet(datagram.payload)? else {
            return Ok(());
        };

        let record = RemoteServerRecord::from_response(datagram.source.ip(), &response);
        let snapshot = {
            let mut registry = self.shared.registry();
            match registry.upsert(record) {
                RegistryChange::Unchanged => None,
                RegistryChange::Inserted | RegistryChange::Updated => Some(registry.records()),
            }
        };
        if let Some(records) = snapshot {
            self.shared.notify(records);
        }
        Ok(())
    }
}

/// Keeps a live list of servers answering on a discovery transport.
pub struct ServerBrowser {
    shared: Arc<BrowserShared>,
    transport: Arc<dyn DatagramTransport>,
    worker: Option<JoinHandle<()>>,
}

impl ServerBrowser {
    /// Starts browsing on `transport`.  The transport must already be open
    /// (or be a loopback transport) for the searches to go anywhere.
    ///
    /// Returns the browser and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Spawn`] if the worker thread cannot start.
    pub fn start(
        transport: Arc<dyn DatagramTransport>,
        config: BrowserConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BrowserEvent>), ControlError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BrowserShared {
            registry: Mutex::new(RemoteServerRegistry::new()),
            events: tx,
            running: AtomicBool::new(true),
        });
        transport.add_listener(Arc::new(ResponseCollector {
            shared: Arc::clone(&shared),
        }));

        let worker = {
            let shared = Arc::clone(&shared);
            let transport = Arc::clone(&transport);
            thread::Builder::new()
                .name("lanstream-browser".to_string())
                .spawn(move || browse_loop(shared, transport, config))
                .map_err(ControlError::Spawn)?
        };

        info!(
            interval_ms = config.search_interval.as_millis() as u64,
            stale_ms = config.stale_after.as_millis() as u64,
            "Server browser started"
        );
        Ok((
            Self {
                shared,
                transport,
                worker: Some(worker),
            },
            rx,
        ))
    }

    /// Broadcasts one `SERVER_SEARCH` now, outside the regular schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Transport`] if the send fails.
    pub fn search_now(&self) -> Result<(), ControlError> {
        send_search(self.transport.as_ref())?;
        Ok(())
    }

    /// Every known server, sorted by control address.
    pub fn servers(&self) -> Vec<RemoteServerRecord> {
        self.shared.registry().records()
    }

    /// Servers whose verification token `encryption` opens.  A wrong secret
    /// simply yields an empty list.
    pub fn compatible_servers(&self, encryption: Option<&Encryption>) -> Vec<RemoteServerRecord> {
        self.shared.registry().compatible(encryption)
    }

    /// Adds a record obtained some other way (e.g. a direct TCP query).  It
    /// ages out like any other record unless the server also answers
    /// searches.
    pub fn insert(&self, record: RemoteServerRecord) {
        let snapshot = {
            let mut registry = self.shared.registry();
            match registry.upsert(record) {
                RegistryChange::Unchanged => None,
                _ => Some(registry.records()),
            }
        };
        if let Some(records) = snapshot {
            self.shared.notify(records);
        }
    }

    /// Stops the worker and ignores further responses.  Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Server browser worker panicked");
            }
            info!("Server browser stopped");
        }
    }
}

impl Drop for ServerBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_search<S: DatagramSink + ?Sized>(sink: &S) -> Result<(), TransportError> {
    sink.send(&encode_packet(&DiscoveryPacket::ServerSearch), Target::Group)
}

fn browse_loop(shared: Arc<BrowserShared>, transport: Arc<dyn DatagramTransport>, config: BrowserConfig) {
    let mut next_search = Instant::now();

    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= next_search {
            if let Err(e) = send_search(transport.as_ref()) {
                warn!("Failed to send server search: {e}");
            }
            next_search = now + config.search_interval;

            let snapshot = {
                let mut registry = shared.registry();
                let evicted = registry.sweep_stale(Instant::now(), config.stale_after);
                for record in &evicted {
                    debug!(server = %record.control_address, "Server went quiet");
                }
                (!evicted.is_empty()).then(|| registry.records())
            };
            if let Some(records) = snapshot {
                shared.notify(records);
            }
        }
        thread::sleep(STOP_POLL.min(next_search.saturating_duration_since(Instant::now())));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
