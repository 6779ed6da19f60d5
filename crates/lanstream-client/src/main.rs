//! LanStream client entry point.
//!
//! Browses the LAN for streaming servers and, with `--play`, pipes the
//! first compatible stream to stdout or a file.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides
//!  └─ MulticastTransport::open()     -- discovery receive thread
//!  └─ ServerBrowser::start()         -- search + sweep thread
//!  └─ event loop
//!       ├─ ServersChanged  -> log list, ServerSelector::update()
//!       ├─ retry tick      -> ServerSelector::update() if not playing
//!       ├─ session ended   -> log, forget the server, retry on next tick
//!       └─ Ctrl-C          -> stop session, browser, transport
//! ```
//!
//! # Playing the stream (for beginners)
//!
//! The output is raw PCM in the format the server announced, which is
//! logged when the connection opens.  For the default CD-quality stereo:
//!
//! ```bash
//! lanstream-client --play | aplay -f cd
//! ```
//!
//! Logs go to stderr, so they never mix with the audio on stdout.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lanstream_client::application::select_server::{playable_servers, Selection, ServerSelector};
use lanstream_client::infrastructure::network::audio_receiver::{
    AudioReceiver, ReceiveError, ReceiveSummary, DEFAULT_CONNECT_TIMEOUT,
};
use lanstream_client::infrastructure::storage::config::{
    load_config, load_config_from, save_config, save_config_to, ClientConfig,
};
use lanstream_core::{Encryption, RemoteServerRecord};
use lanstream_discovery::{query_server, BrowserEvent, DatagramTransport, MulticastTransport, ServerBrowser};

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Find LanStream servers on the local network and listen to one.
#[derive(Debug, Parser)]
#[command(name = "lanstream-client", version, about)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, short, env = "LANSTREAM_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Shared secret; servers with a different secret are not shown.
    #[arg(long, env = "LANSTREAM_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Discovery multicast group address.
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// UDP port of the discovery multicast group.
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Local IPv4 address of the interface to join the group on.
    #[arg(long)]
    interface: Option<Ipv4Addr>,

    /// Control address of a specific server.  It is queried directly and
    /// is the only server played.
    #[arg(long)]
    server: Option<SocketAddr>,

    /// Receive audio from the first compatible server.
    #[arg(long)]
    play: bool,

    /// Write audio to this file instead of stdout.
    #[arg(long, short, requires = "play")]
    output: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        if self.secret.is_some() {
            config.security.secret = self.secret.clone();
        }
        if let Some(group) = self.group {
            config.network.multicast_group = group;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if self.interface.is_some() {
            config.network.interface = self.interface;
        }
    }
}

/// One live audio connection.  The task hands the sink back when it ends.
struct Session {
    server: SocketAddr,
    running: watch::Sender<bool>,
    task: JoinHandle<(Sink, Result<ReceiveSummary, ReceiveError>)>,
}

async fn open_sink(output: Option<&PathBuf>) -> anyhow::Result<Sink> {
    match output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

fn log_servers(records: &[RemoteServerRecord], encryption: Option<&Encryption>) {
    let playable = playable_servers(records, encryption);
    info!(
        known = records.len(),
        playable = playable.len(),
        "Server list changed"
    );
    for record in &playable {
        if let Some(audio) = &record.audio {
            info!(
                control = %record.control_address,
                audio = %audio.address,
                format = %audio.format,
                "  compatible server"
            );
        }
    }
    for record in records.iter().filter(|r| !r.is_compatible(encryption)) {
        debug!(control = %record.control_address, "  server uses a different secret");
    }
}

/// Connects to `record`'s audio endpoint and spawns the copy task.  On
/// failure the sink is handed back unused.
async fn start_session(record: &RemoteServerRecord, sink: Sink) -> Result<Session, (Sink, ReceiveError)> {
    let Some(endpoint) = &record.audio else {
        return Err((
            sink,
            ReceiveError::Connect {
                addr: record.control_address,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "server advertises no audio"),
            },
        ));
    };
    let receiver = match AudioReceiver::connect(endpoint, DEFAULT_CONNECT_TIMEOUT).await {
        Ok(receiver) => receiver,
        Err(e) => return Err((sink, e)),
    };
    let (running, running_rx) = watch::channel(true);
    let mut sink = sink;
    let task = tokio::spawn(async move {
        let result = receiver.receive_into(&mut sink, running_rx).await;
        (sink, result)
    });
    Ok(Session {
        server: record.control_address,
        running,
        task,
    })
}

/// Signals the session to stop and waits for the sink to come back.
async fn stop_session(session: Session) -> Option<Sink> {
    let _ = session.running.send(false);
    finish_session(session.server, session.task.await)
}

fn finish_session(
    server: SocketAddr,
    joined: Result<(Sink, Result<ReceiveSummary, ReceiveError>), tokio::task::JoinError>,
) -> Option<Sink> {
    match joined {
        Ok((sink, Ok(summary))) => {
            info!(%server, bytes = summary.bytes, end = ?summary.end, "Stopped listening");
            Some(sink)
        }
        Ok((sink, Err(ReceiveError::Write(e)))) => {
            // A closed stdout (player exited) is not worth retrying into.
            warn!(%server, "Audio sink failed: {e}");
            drop(sink);
            None
        }
        Ok((sink, Err(e))) => {
            warn!(%server, "Audio stream failed: {e}");
            Some(sink)
        }
        Err(e) => {
            warn!(%server, "Receive task ended abnormally: {e}");
            None
        }
    }
}

/// Resolves when the current session's task ends; never if there is none.
async fn session_ended(
    session: &mut Option<Session>,
) -> Result<(Sink, Result<ReceiveSummary, ReceiveError>), tokio::task::JoinError> {
    match session {
        Some(session) => (&mut session.task).await,
        None => std::future::pending().await,
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

    info!("LanStream client starting");
    let encryption = config.security.secret.as_deref().map(Encryption::from_passphrase);

    // ── Discovery ─────────────────────────────────────────────────────────────
    let transport = Arc::new(MulticastTransport::new(config.multicast_config()));
    transport.set_encryption(encryption.clone());
    transport.open().context("failed to open discovery transport")?;
    let (mut browser, mut events) =
        ServerBrowser::start(transport.clone(), config.browser_config()).context("failed to start browsing")?;

    if let Some(addr) = cli.server {
        match tokio::task::spawn_blocking(move || query_server(addr, DEFAULT_CONNECT_TIMEOUT)).await {
            Ok(Ok(record)) => browser.insert(record),
            Ok(Err(e)) => warn!(%addr, "Direct query failed, relying on multicast: {e}"),
            Err(e) => warn!(%addr, "Direct query task failed: {e}"),
        }
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut selector = ServerSelector::new(encryption, cli.server);
    let mut sink = if cli.play {
        Some(open_sink(cli.output.as_ref()).await?)
    } else {
        None
    };
    let mut session: Option<Session> = None;
    let mut retry = tokio::time::interval(config.browser_config().search_interval.max(Duration::from_millis(100)));
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Searching for servers.  Press Ctrl-C to exit.");
    let outcome: anyhow::Result<()> = loop {
        let records = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal
                    .context("failed to listen for Ctrl-C")
                    .map(|()| info!("shutdown signal received"));
            }
            event = events.recv() => match event {
                Some(BrowserEvent::ServersChanged(records)) => {
                    log_servers(&records, selector.encryption());
                    records
                }
                None => break Err(anyhow::anyhow!("server browser stopped unexpectedly")),
            },
            _ = retry.tick(), if cli.play && session.is_none() => browser.servers(),
            joined = session_ended(&mut session) => {
                let server = session.take().map(|s| s.server);
                sink = server.and_then(|server| finish_session(server, joined));
                if sink.is_none() {
                    break Err(anyhow::anyhow!("audio output is no longer writable"));
                }
                selector.clear();
                continue;
            }
        };

        if !cli.play {
            continue;
        }
        match selector.update(&records) {
            Selection::Unchanged => {}
            Selection::Lost => {
                if let Some(old) = session.take() {
                    info!(server = %old.server, "Server stopped streaming");
                    sink = stop_session(old).await;
                }
            }
            Selection::Switched(record) => {
                if let Some(old) = session.take() {
                    sink = stop_session(old).await;
                }
                let Some(out) = sink.take() else {
                    break Err(anyhow::anyhow!("audio output is no longer writable"));
                };
                match start_session(&record, out).await {
                    Ok(started) => {
                        info!(server = %started.server, "Listening");
                        session = Some(started);
                    }
                    Err((out, e)) => {
                        warn!("Could not start listening: {e}");
                        sink = Some(out);
                        selector.clear();
                    }
                }
            }
        }
    };

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Some(old) = session.take() {
        stop_session(old).await;
    }
    browser.stop();
    if let Err(e) = transport.close() {
        warn!("failed to close discovery transport: {e}");
    }

    info!("LanStream client stopped");
    outcome
}
