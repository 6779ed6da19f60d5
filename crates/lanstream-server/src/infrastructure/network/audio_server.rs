//! AudioServer: streams captured PCM to every TCP client on the audio port.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──▶ Starting ──bound + capturing──▶ Running
//!    ▲                    │ (bind or device failure)       │
//!    └────────────────────┘                                │
//!    └──────────────── Stopping ◀─────────stop()───────────┘
//! ```
//!
//! The state and the running flag change together under one mutex, so
//! `start`, `stop` and `is_running` always observe a consistent state.
//!
//! # Threads
//!
//! - The **capture thread** (see [`CaptureLoop`]) reads the device.
//! - The **accept thread** polls a non-blocking listener and spawns one
//!   connection thread per client.  It also forwards capture failures to
//!   the event channel.
//! - Each **connection thread** attaches its own [`FanOutBuffer`], then pops
//!   one chunk at a time and writes it to the socket until the client goes
//!   away or the server stops.  A failing client only ends its own thread.
//!
//! When [`AudioServer::stop`] returns, the listener is closed, the device is
//! released and every connection thread has exited.
//!
//! The TCP stream carries raw PCM in the configured format with no framing;
//! the end of the stream is the connection closing.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lanstream_core::constants::{DEFAULT_AUDIO_PORT, DEFAULT_BUFFER_CHUNKS, DEFAULT_CHUNK_SIZE};
use lanstream_core::AudioFormat;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::infrastructure::audio_capture::capture_loop::{CaptureLoop, CaptureTap};
use crate::infrastructure::audio_capture::fanout::{FanOutBuffer, OverflowPolicy, PopError};
use crate::infrastructure::audio_capture::{share_device, CaptureDevice, DeviceError, SharedDevice};

/// Interval at which the accept loop rechecks its running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Longest a connection thread waits for a chunk before rechecking.
const POP_POLL: Duration = Duration::from_millis(200);

/// A client that cannot take a chunk within this time is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the audio server.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioServerConfig {
    /// Address the TCP listener binds.  Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Format the device is opened with and clients receive.
    pub format: AudioFormat,
    /// Bytes per device read and per socket write.
    pub chunk_size: usize,
    /// Per-client buffer capacity, in chunks.
    pub buffer_chunks: usize,
    pub overflow: OverflowPolicy,
}

impl AudioServerConfig {
    /// Per-client buffer capacity in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.chunk_size * self.buffer_chunks.max(1)
    }
}

impl Default for AudioServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_AUDIO_PORT)),
            format: AudioFormat::pcm_signed(44_100.0, 16, 2, false),
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Notifications sent to the server's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Started { local_addr: SocketAddr },
    Stopped,
    ClientConnected { id: Uuid, peer: SocketAddr },
    ClientDisconnected { id: Uuid, peer: SocketAddr },
    /// The capture device failed; no more audio will flow until restarted.
    CaptureFailed(String),
}

/// API misuse.  These are programmer errors, not runtime conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("audio server is already running")]
    AlreadyRunning,
    #[error("audio server is not running")]
    NotRunning,
    #[error("no capture device has been set")]
    DeviceMissing,
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("failed to bind audio listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to spawn audio server thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A failure on one client connection.  Logged, never propagated.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to configure client socket: {0}")]
    Setup(#[source] io::Error),
    #[error("write to client failed: {0}")]
    Write(#[source] io::Error),
    #[error("client buffer misconfigured: {0}")]
    Buffer(#[source] PopError),
}

/// A registered client.  `socket` is a second handle to the connection's
/// stream so shutdown can interrupt a write stuck on a slow peer.
struct Client {
    peer: SocketAddr,
    socket: TcpStream,
}

/// State shared with the accept and connection threads.
struct Shared {
    config: AudioServerConfig,
    running: AtomicBool,
    connections: Mutex<HashMap<Uuid, Client>>,
    events: mpsc::Sender<ServerEvent>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<Uuid, Client>> {
        self.connections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

struct ActiveServer {
    local_addr: SocketAddr,
    capture: CaptureLoop,
    acceptor: JoinHandle<()>,
}

struct Lifecycle {
    state: ServerState,
    active: Option<ActiveServer>,
}

/// TCP server fanning one capture device out to many clients.
pub struct AudioServer {
    shared: Arc<Shared>,
    device: Mutex<Option<SharedDevice>>,
    lifecycle: Mutex<Lifecycle>,
}

impl AudioServer {
    /// Creates a stopped server without a device and returns it together
    /// with the event receiver.
    pub fn new(config: AudioServerConfig) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel();
        let server = Self {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                connections: Mutex::new(HashMap::new()),
                events: tx,
            }),
            device: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle {
                state: ServerState::Stopped,
                active: None,
            }),
        };
        (server, rx)
    }

    /// Like [`new`](Self::new) with the device already set.
    pub fn with_device(
        config: AudioServerConfig,
        device: Box<dyn CaptureDevice>,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (server, rx) = Self::new(config);
        *server.device_slot() = Some(share_device(device));
        (server, rx)
    }

    /// Replaces the capture device used by the next `start`.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::AlreadyRunning`] unless the server is stopped.
    pub fn set_device(&self, device: Box<dyn CaptureDevice>) -> Result<(), UsageError> {
        let lifecycle = self.lifecycle();
        if lifecycle.state != ServerState::Stopped {
            return Err(UsageError::AlreadyRunning);
        }
        *self.device_slot() = Some(share_device(device));
        Ok(())
    }

    /// Binds the listener, starts capturing and begins accepting clients.
    ///
    /// Returns the bound address (useful when the configured port is 0).
    ///
    /// # Errors
    ///
    /// - [`UsageError::AlreadyRunning`] unless the server is stopped.
    /// - [`UsageError::DeviceMissing`] if no device has been set.
    /// - [`ServerError::Bind`] or [`ServerError::Device`] if the port or the
    ///   device is unavailable.  The server is left stopped.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != ServerState::Stopped {
            return Err(UsageError::AlreadyRunning.into());
        }
        let device = self.device_slot().clone().ok_or(UsageError::DeviceMissing)?;

        lifecycle.state = ServerState::Starting;
        match self.launch(device) {
            Ok(active) => {
                let local_addr = active.local_addr;
                lifecycle.active = Some(active);
                lifecycle.state = ServerState::Running;
                info!(%local_addr, format = %self.shared.config.format, "Audio server running");
                self.shared.emit(ServerEvent::Started { local_addr });
                Ok(local_addr)
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                lifecycle.state = ServerState::Stopped;
                warn!("Audio server failed to start: {e}");
                Err(e)
            }
        }
    }

    fn launch(&self, device: SharedDevice) -> Result<ActiveServer, ServerError> {
        let config = &self.shared.config;
        let addr = config.bind_addr;
        let bind_error = |source| ServerError::Bind { addr, source };

        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (mut capture, failures) = CaptureLoop::start(device, &config.format, config.chunk_size)?;
        self.shared.running.store(true, Ordering::Release);

        let spawned = {
            let shared = Arc::clone(&self.shared);
            let tap = capture.tap();
            thread::Builder::new()
                .name("lanstream-audio-accept".to_string())
                .spawn(move || accept_loop(listener, shared, tap, failures))
        };
        match spawned {
            Ok(acceptor) => Ok(ActiveServer {
                local_addr,
                capture,
                acceptor,
            }),
            Err(e) => {
                capture.stop();
                Err(ServerError::Spawn(e))
            }
        }
    }

    /// Stops accepting, releases the device and disconnects every client.
    ///
    /// Blocks until all server threads have exited, unless called from the
    /// accept thread itself.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::NotRunning`] unless the server is running.
    pub fn stop(&self) -> Result<(), UsageError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != ServerState::Running {
            return Err(UsageError::NotRunning);
        }
        lifecycle.state = ServerState::Stopping;
        self.shared.running.store(false, Ordering::Release);

        if let Some(mut active) = lifecycle.active.take() {
            // Closing the capture closes every client buffer, which wakes
            // the connection threads.
            if !active.capture.stop() {
                warn!("Capture device was not released in time");
            }
            if active.acceptor.thread().id() == thread::current().id() {
                debug!("stop() called from the accept thread; not waiting for it");
            } else if active.acceptor.join().is_err() {
                warn!("Audio accept thread panicked");
            }
        }

        lifecycle.state = ServerState::Stopped;
        info!("Audio server stopped");
        self.shared.emit(ServerEvent::Stopped);
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// The bound listener address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle().active.as_ref().map(|a| a.local_addr)
    }

    /// Number of clients currently being streamed to.
    pub fn connection_count(&self) -> usize {
        self.shared.connections().len()
    }

    pub fn config(&self) -> &AudioServerConfig {
        &self.shared.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device_slot(&self) -> MutexGuard<'_, Option<SharedDevice>> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AudioServer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    tap: CaptureTap,
    failures: mpsc::Receiver<DeviceError>,
) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    while shared.is_running() {
        if let Ok(e) = failures.try_recv() {
            shared.emit(ServerEvent::CaptureFailed(e.to_string()));
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let conn_shared = Arc::clone(&shared);
                let tap = tap.clone();
                let spawned = thread::Builder::new()
                    .name("lanstream-audio-conn".to_string())
                    .spawn(move || handle_connection(stream, peer, &conn_shared, &tap));
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(e) => warn!(%peer, "Failed to spawn connection thread: {e}"),
                }
            }
            Err(e) if is_timeout_error(&e) => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Audio accept error: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
        connections.retain(|handle| !handle.is_finished());
    }

    // Refuse new clients, then cut off the current ones so none of them
    // sits in a write until `WRITE_TIMEOUT`.
    drop(listener);
    for (id, client) in shared.connections().iter() {
        if let Err(e) = client.socket.shutdown(Shutdown::Both) {
            debug!(%id, peer = %client.peer, "Client socket already closed: {e}");
        }
    }
    for handle in connections {
        if handle.join().is_err() {
            warn!("Audio connection thread panicked");
        }
    }
    debug!("Audio accept loop exited");
}

/// Keeps a connection registered for exactly as long as its thread runs.
struct Registration<'a> {
    id: Uuid,
    peer: SocketAddr,
    shared: &'a Shared,
    tap: &'a CaptureTap,
    buffer: Arc<FanOutBuffer>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.tap.detach(&self.buffer);
        self.shared.connections().remove(&self.id);
        info!(id = %self.id, peer = %self.peer, "Client disconnected");
        self.shared.emit(ServerEvent::ClientDisconnected {
            id: self.id,
            peer: self.peer,
        });
    }
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: &Shared, tap: &CaptureTap) {
    let id = Uuid::new_v4();
    let socket = match stream.try_clone() {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%peer, "Failed to register client: {}", ConnectionError::Setup(e));
            return;
        }
    };
    let buffer = tap.attach(Arc::new(FanOutBuffer::new(
        shared.config.buffer_capacity(),
        shared.config.overflow,
    )));
    shared.connections().insert(id, Client { peer, socket });
    let registration = Registration {
        id,
        peer,
        shared,
        tap,
        buffer,
    };
    info!(%id, %peer, "Client connected");
    shared.emit(ServerEvent::ClientConnected { id, peer });

    if let Err(e) = stream_to_client(stream, &registration.buffer, shared) {
        debug!(%id, %peer, "Client stream ended: {e}");
    }
}

fn stream_to_client(mut stream: TcpStream, buffer: &FanOutBuffer, shared: &Shared) -> Result<(), ConnectionError> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false).map_err(ConnectionError::Setup)?;
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(ConnectionError::Setup)?;
    stream.set_nodelay(true).map_err(ConnectionError::Setup)?;

    let mut chunk = vec![0u8; shared.config.chunk_size];
    while shared.is_running() {
        match buffer.pop_timeout(&mut chunk, POP_POLL) {
            Ok(true) => stream.write_all(&chunk).map_err(ConnectionError::Write)?,
            Ok(false) => {}
            Err(PopError::Closed(_)) => break,
            Err(e @ PopError::TooLarge { .. }) => return Err(ConnectionError::Buffer(e)),
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
