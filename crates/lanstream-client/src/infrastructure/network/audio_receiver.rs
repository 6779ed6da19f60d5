//! AudioReceiver: pulls the raw PCM stream from a server's audio endpoint.
//!
//! # Stream shape (for beginners)
//!
//! The audio connection carries no headers and no framing.  The format was
//! already announced in the discovery response, so the bytes on the socket
//! are nothing but consecutive PCM frames.  The receiver copies them into
//! any [`AsyncWrite`] sink (stdout, a file, a pipe to a player) until one of
//! two things happens:
//!
//! - the server closes the connection (it stopped streaming or dropped us),
//! - the caller clears the `running` flag (Ctrl-C).
//!
//! Only whole frames reach the sink.  TCP may split a frame across two
//! reads; the tail is held back until the rest arrives, so a player reading
//! the sink never loses channel alignment.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use lanstream_core::{AudioFormat, RemoteAudioEndpoint};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

/// How long [`AudioReceiver::connect`] waits by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size; grown to hold at least two frames of exotic formats.
const READ_BUFFER: usize = 16 * 1024;

/// Errors that can occur while receiving audio.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// TCP connection to the audio endpoint failed.
    #[error("failed to connect to audio endpoint {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The endpoint did not accept within the timeout.
    #[error("timed out connecting to audio endpoint {0}")]
    ConnectTimeout(SocketAddr),
    /// The stream failed for a reason other than an orderly close.
    #[error("audio stream read error: {0}")]
    Read(#[source] io::Error),
    /// The sink refused the audio.
    #[error("failed to write audio to sink: {0}")]
    Write(#[source] io::Error),
}

/// Why [`AudioReceiver::receive_into`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the connection.
    ServerClosed,
    /// The `running` flag was cleared or its sender dropped.
    Shutdown,
}

/// What a finished receive session delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub end: StreamEnd,
    /// Bytes written to the sink; always a multiple of the frame size.
    pub bytes: u64,
    /// Trailing bytes of an incomplete frame that were never written.
    pub discarded: usize,
}

/// A connected audio stream.
#[derive(Debug)]
pub struct AudioReceiver {
    endpoint: RemoteAudioEndpoint,
    stream: TcpStream,
    frame_bytes: usize,
}

impl AudioReceiver {
    /// Connects to `endpoint`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::Connect`] if the connection is refused and
    /// [`ReceiveError::ConnectTimeout`] if it does not complete in time.
    pub async fn connect(endpoint: &RemoteAudioEndpoint, timeout: Duration) -> Result<Self, ReceiveError> {
        let addr = endpoint.address;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ReceiveError::Connect { addr, source }),
            Err(_) => return Err(ReceiveError::ConnectTimeout(addr)),
        };
        // Latency matters more than segment efficiency for a one-way stream.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY on {addr}: {e}");
        }

        let frame_bytes = endpoint.format.frame_bytes().unwrap_or(1).max(1);
        info!(%addr, format = %endpoint.format, "connected to audio endpoint");
        Ok(Self {
            endpoint: endpoint.clone(),
            stream,
            frame_bytes,
        })
    }

    pub fn endpoint(&self) -> &RemoteAudioEndpoint {
        &self.endpoint
    }

    pub fn format(&self) -> &AudioFormat {
        &self.endpoint.format
    }

    /// Copies whole frames into `sink` until the server closes the stream or
    /// `running` becomes `false`.  The sink is flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::Read`] if the socket fails and
    /// [`ReceiveError::Write`] if the sink does.
    pub async fn receive_into<W>(
        mut self,
        sink: &mut W,
        mut running: watch::Receiver<bool>,
    ) -> Result<ReceiveSummary, ReceiveError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; READ_BUFFER.max(self.frame_bytes * 2)];
        let mut filled = 0usize;
        let mut bytes = 0u64;

        let end = loop {
            if !*running.borrow_and_update() {
                break StreamEnd::Shutdown;
            }
            tokio::select! {
                changed = running.changed() => {
                    if changed.is_err() {
                        break StreamEnd::Shutdown;
                    }
                }
                read = self.stream.read(&mut buf[filled..]) => match read {
                    Ok(0) => break StreamEnd::ServerClosed,
                    Ok(n) => {
                        filled += n;
                        let whole = filled - filled % self.frame_bytes;
                        if whole > 0 {
                            sink.write_all(&buf[..whole]).await.map_err(ReceiveError::Write)?;
                            bytes += whole as u64;
                            buf.copy_within(whole..filled, 0);
                            filled -= whole;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(ReceiveError::Read(e)),
                },
            }
        };

        sink.flush().await.map_err(ReceiveError::Write)?;
        if filled > 0 {
            debug!(discarded = filled, "dropping incomplete trailing frame");
        }
        info!(addr = %self.endpoint.address, bytes, ?end, "audio stream ended");
        Ok(ReceiveSummary {
            end,
            bytes,
            discarded: filled,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, RemoteAudioEndpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = RemoteAudioEndpoint {
            address: listener.local_addr().unwrap(),
            // 2-byte frames: 16-bit mono.
            format: AudioFormat::pcm_signed(44_100.0, 16, 1, false),
        };
        (listener, endpoint)
    }

    #[tokio::test]
    async fn test_receive_copies_stream_until_server_closes() {
        // Arrange
        let (listener, endpoint) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for chunk in [vec![1u8, 2, 3, 4], vec![5, 6], vec![7, 8, 9, 10]] {
                socket.write_all(&chunk).await.unwrap();
            }
        });
        let (_running_tx, running) = watch::channel(true);

        // Act
        let receiver = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await.unwrap();
        let mut sink = Vec::new();
        let summary = receiver.receive_into(&mut sink, running).await.unwrap();

        // Assert
        server.await.unwrap();
        assert_eq!(sink, (1..=10).collect::<Vec<u8>>());
        assert_eq!(summary.end, StreamEnd::ServerClosed);
        assert_eq!(summary.bytes, 10);
        assert_eq!(summary.discarded, 0);
    }

    #[tokio::test]
    async fn test_split_frame_is_reassembled_and_trailing_half_frame_dropped() {
        // Arrange: frame boundaries deliberately straddle the writes.
        let (listener, endpoint) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[1]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&[2, 3]).await.unwrap();
        });
        let (_running_tx, running) = watch::channel(true);

        // Act
        let receiver = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await.unwrap();
        let mut sink = Vec::new();
        let summary = receiver.receive_into(&mut sink, running).await.unwrap();

        // Assert
        server.await.unwrap();
        assert_eq!(sink, vec![1, 2]);
        assert_eq!(summary.bytes, 2);
        assert_eq!(summary.discarded, 1);
    }

    #[tokio::test]
    async fn test_clearing_running_flag_ends_an_idle_stream() {
        // Arrange: the server accepts and then sends nothing.
        let (listener, endpoint) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });
        let (running_tx, running) = watch::channel(true);
        let receiver = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await.unwrap();

        // Act
        let task = tokio::spawn(async move {
            let mut sink = Vec::new();
            receiver.receive_into(&mut sink, running).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        running_tx.send(false).unwrap();

        // Assert
        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("receiver honours shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(summary.end, StreamEnd::Shutdown);
        assert_eq!(summary.bytes, 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_dropped_flag_sender_counts_as_shutdown() {
        let (listener, endpoint) = listener().await;
        let _server = tokio::spawn(async move { listener.accept().await });
        let (running_tx, running) = watch::channel(true);
        let receiver = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await.unwrap();

        drop(running_tx);
        let mut sink = Vec::new();
        let summary = receiver.receive_into(&mut sink, running).await.unwrap();

        assert_eq!(summary.end, StreamEnd::Shutdown);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_connect_error() {
        // Arrange: bind then drop to get a port nobody listens on.
        let (listener, endpoint) = listener().await;
        drop(listener);

        // Act
        let result = AudioReceiver::connect(&endpoint, DEFAULT_CONNECT_TIMEOUT).await;

        // Assert
        assert!(matches!(result, Err(ReceiveError::Connect { addr, .. }) if addr == endpoint.address));
    }

    #[test]
    fn test_receive_error_messages_name_the_endpoint() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert!(ReceiveError::ConnectTimeout(addr).to_string().contains("10.0.0.1:9000"));
    }
}
