//! LanStream server entry point.
//!
//! Loads the configuration, opens the discovery transport and starts
//! streaming until Ctrl-C or a capture failure.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides
//!  └─ MulticastTransport::open()      -- discovery receive thread
//!  └─ StreamService::new()
//!       ├─ ControlResponder           (answers SERVER_SEARCH)
//!       └─ ControlServer              (TCP control thread)
//!  └─ StreamService::start_audio()
//!       └─ AudioServer                (capture, accept, connection threads)
//!  └─ event pump (blocking task) ──▶ shutdown on Ctrl-C / capture failure
//! ```
//!
//! Logs go to stderr so that nothing but configuration output ever reaches
//! stdout.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use lanstream_discovery::MulticastTransport;
use lanstream_server::application::stream_service::{StreamService, StreamSettings};
use lanstream_server::infrastructure::audio_capture::reader::ReaderDevice;
use lanstream_server::infrastructure::audio_capture::synthetic::ToneDevice;
use lanstream_server::infrastructure::audio_capture::CaptureDevice;
use lanstream_server::infrastructure::network::audio_server::ServerEvent;
use lanstream_server::infrastructure::storage::config::{
    load_config, load_config_from, save_config, save_config_to, ServerConfig, SourceConfig, SourceKind,
};

/// Stream a PCM source to listeners on the local network.
#[derive(Debug, Parser)]
#[command(name = "lanstream-server", version, about)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, short, env = "LANSTREAM_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port for the control endpoint.
    #[arg(long)]
    control_port: Option<u16>,

    /// TCP port listeners connect to for audio.
    #[arg(long)]
    audio_port: Option<u16>,

    /// UDP port of the discovery multicast group.
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Discovery multicast group address.
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Local IPv4 address of the interface to join the group on.
    #[arg(long)]
    interface: Option<Ipv4Addr>,

    /// Shared secret protecting discovery.
    #[arg(long, env = "LANSTREAM_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Where the audio comes from.
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Frequency of the generated tone, in Hz.
    #[arg(long)]
    tone_frequency: Option<f32>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Overrides file values with whatever was given on the command line.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.control_port {
            config.network.control_port = port;
        }
        if let Some(port) = self.audio_port {
            config.network.audio_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(group) = self.group {
            config.network.multicast_group = group;
        }
        if self.interface.is_some() {
            config.network.interface = self.interface;
        }
        if self.secret.is_some() {
            config.security.secret = self.secret.clone();
        }
        if let Some(kind) = self.source {
            config.source.kind = kind;
        }
        if let Some(frequency) = self.tone_frequency {
            config.source.tone_frequency = frequency;
        }
    }
}

fn capture_device(source: &SourceConfig) -> Box<dyn CaptureDevice> {
    match source.kind {
        SourceKind::Tone => Box::new(ToneDevice::new(source.tone_frequency)),
        SourceKind::Stdin => Box::new(ReaderDevice::stdin()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    // Initialise structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.save_config {
        let path = match &cli.config {
            Some(path) => save_config_to(&config, path).map(|()| path.clone()),
            None => save_config(&config),
        }
        .context("failed to save configuration")?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    info!("LanStream server starting");

    // ── Discovery transport ───────────────────────────────────────────────────
    let transport = Arc::new(MulticastTransport::new(config.multicast_config()));
    transport.open().context("failed to open discovery transport")?;

    // ── Control endpoint + audio ──────────────────────────────────────────────
    let (mut service, events) = StreamService::new(
        StreamSettings::from_config(&config),
        transport.clone(),
        capture_device(&config.source),
    )
    .context("failed to start control endpoint")?;
    let audio_addr = service.start_audio().context("failed to start audio server")?;
    info!(
        control = %service.control_addr(),
        audio = %audio_addr,
        format = %config.audio.format(),
        "LanStream server ready.  Press Ctrl-C to exit."
    );

    // ── Event pump ────────────────────────────────────────────────────────────
    let (fatal_tx, mut fatal_rx) = tokio::sync::mpsc::unbounded_channel();
    let pump = tokio::task::spawn_blocking(move || {
        for event in events {
            match event {
                ServerEvent::CaptureFailed(reason) => {
                    error!("Capture failed: {reason}");
                    let _ = fatal_tx.send(reason);
                }
                other => debug!(?other, "Audio server event"),
            }
        }
    });

    // ── Wait for Ctrl-C or a fatal capture error ──────────────────────────────
    let outcome: anyhow::Result<()> = tokio::select! {
        signal = tokio::signal::ctrl_c() => signal
            .context("failed to listen for Ctrl-C")
            .map(|()| info!("shutdown signal received")),
        Some(reason) = fatal_rx.recv() => Err(anyhow::anyhow!("capture device failed: {reason}")),
    };

    service.shutdown();
    // Dropping the service drops the event sender, which ends the pump.
    drop(service);
    if let Err(e) = pump.await {
        warn!("event pump ended abnormally: {e}");
    }
    if let Err(e) = transport.close() {
        warn!("failed to close discovery transport: {e}");
    }

    info!("LanStream server stopped");
    outcome
}
