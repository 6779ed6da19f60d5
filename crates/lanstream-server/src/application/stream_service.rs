//! StreamService: every server-side component behind one handle.
//!
//! ```text
//!                ┌──────────────── StreamService ────────────────┐
//!  multicast ───▶│ DatagramTransport ──▶ ControlResponder        │
//!  TCP control ─▶│ ControlServer ───────▶ (same advertisement)   │
//!  TCP audio ───▶│ AudioServer ◀── CaptureDevice                 │
//!                └───────────────────────────────────────────────┘
//! ```
//!
//! The service keeps what searching clients are told in step with reality:
//! the audio endpoint is advertised only while the audio server runs and its
//! capture device works, and a new secret re-keys the transport and
//! regenerates the verification token together.
//!
//! Audio server events pass through a small relay thread on their way to
//! the owner.  On [`ServerEvent::CaptureFailed`] the relay withdraws the
//! audio endpoint first, so clients stop being sent to a stream that would
//! only give them an immediate EOF.

use std::io;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;

use lanstream_core::{AdvertisedAudio, Encryption, ServerSearchResponse};
use lanstream_discovery::{ControlError, ControlResponder, ControlServer, DatagramTransport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::audio_capture::CaptureDevice;
use crate::infrastructure::network::audio_server::{
    AudioServer, AudioServerConfig, ServerError, ServerEvent, UsageError,
};
use crate::infrastructure::storage::config::ServerConfig;

/// Error type for stream service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("failed to spawn event relay thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Everything the service needs besides the transport and the device.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Where the TCP control endpoint binds.  Port 0 picks a free port,
    /// which is then advertised.
    pub control_addr: SocketAddr,
    pub audio: AudioServerConfig,
    pub secret: Option<String>,
}

impl StreamSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            control_addr: config.control_addr(),
            audio: config.audio_server_config(),
            secret: config.security.secret.clone(),
        }
    }
}

/// Owns the responder, the control endpoint and the audio server.
pub struct StreamService {
    transport: Arc<dyn DatagramTransport>,
    responder: Arc<ControlResponder>,
    control: ControlServer,
    audio: AudioServer,
    encrypted: bool,
}

impl StreamService {
    /// Binds the control endpoint and starts answering searches on
    /// `transport`.  Audio is not started yet.
    ///
    /// Returns the service and a receiver for the audio server's events,
    /// relayed after the advertisement has been updated for them.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Control`] if the control port cannot be bound
    /// or the verification token cannot be built, and
    /// [`ServiceError::Spawn`] if the event relay thread cannot start.
    pub fn new(
        settings: StreamSettings,
        transport: Arc<dyn DatagramTransport>,
        device: Box<dyn CaptureDevice>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServiceError> {
        let encryption = settings.secret.as_deref().map(Encryption::from_passphrase);

        let responder = Arc::new(ControlResponder::new(
            settings.control_addr.port(),
            encryption.as_ref(),
        )?);
        let control = ControlServer::bind(settings.control_addr, Arc::clone(&responder))?;
        responder.set_control_port(control.local_addr().port());

        transport.set_encryption(encryption.clone());
        transport.add_listener(responder.clone());

        let (audio, server_events) = AudioServer::with_device(settings.audio, device);
        let events = spawn_event_relay(server_events, Arc::clone(&responder))?;
        info!(
            control = %control.local_addr(),
            encrypted = encryption.is_some(),
            "Stream service ready"
        );
        Ok((
            Self {
                transport,
                responder,
                control,
                audio,
                encrypted: encryption.is_some(),
            },
            events,
        ))
    }

    /// Starts the audio server and advertises its endpoint.
    ///
    /// # Errors
    ///
    /// Propagates [`AudioServer::start`] failures; nothing is advertised.
    pub fn start_audio(&self) -> Result<SocketAddr, ServiceError> {
        let local_addr = self.audio.start()?;
        self.responder.set_audio(Some(AdvertisedAudio {
            port: local_addr.port(),
            format: self.audio.config().format.clone(),
        }));
        Ok(local_addr)
    }

    /// Withdraws the audio endpoint, then stops the audio server.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Usage`] if audio is not running.
    pub fn stop_audio(&self) -> Result<(), ServiceError> {
        self.responder.set_audio(None);
        self.audio.stop()?;
        Ok(())
    }

    /// Switches to a new secret (or to plaintext with `None`).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Control`] if the new token cannot be sealed;
    /// the old secret stays in effect.
    pub fn set_secret(&mut self, secret: Option<&str>) -> Result<(), ServiceError> {
        let encryption = secret.map(Encryption::from_passphrase);
        self.responder.set_encryption(encryption.as_ref())?;
        self.transport.set_encryption(encryption.clone());
        self.encrypted = encryption.is_some();
        info!(encrypted = self.encrypted, "Discovery secret changed");
        Ok(())
    }

    /// What a search currently returns.
    pub fn advertisement(&self) -> ServerSearchResponse {
        self.responder.response()
    }

    pub fn audio(&self) -> &AudioServer {
        &self.audio
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control.local_addr()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Stops audio (if running) and the control endpoint.  Idempotent.
    pub fn shutdown(&mut self) {
        if self.audio.is_running() {
            if let Err(e) = self.stop_audio() {
                warn!("Failed to stop audio cleanly: {e}");
            }
        }
        self.control.stop();
    }
}

impl Drop for StreamService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forwards audio server events to the returned receiver, withdrawing the
/// advertised audio endpoint when capture fails.  Ends when the audio
/// server is dropped.
fn spawn_event_relay(
    server_events: mpsc::Receiver<ServerEvent>,
    responder: Arc<ControlResponder>,
) -> Result<mpsc::Receiver<ServerEvent>, ServiceError> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("lanstream-events".to_string())
        .spawn(move || {
            for event in server_events {
                if let ServerEvent::CaptureFailed(reason) = &event {
                    warn!("Withdrawing audio advertisement: capture failed: {reason}");
                    responder.set_audio(None);
                }
                // A dropped receiver only means nobody is watching.
                let _ = tx.send(event);
            }
            debug!("Event relay stopped");
        })
        .map_err(ServiceError::Spawn)?;
    Ok(rx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
