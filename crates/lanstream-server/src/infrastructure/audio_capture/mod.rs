//! Audio capture infrastructure for the streaming server.
//!
//! A [`CaptureDevice`] produces raw PCM in a negotiated [`AudioFormat`].  The
//! [`capture_loop::CaptureLoop`] owns one device on a dedicated thread and
//! copies every chunk it reads into each attached
//! [`fanout::FanOutBuffer`], one buffer per connected listener.
//!
//! ```text
//!  CaptureDevice ──read──▶ CaptureLoop ──push──▶ FanOutBuffer ──pop──▶ client A
//!                                       ──push──▶ FanOutBuffer ──pop──▶ client B
//! ```
//!
//! # Testability
//!
//! The trait lets tests drive the whole pipeline with
//! [`mock::MockCaptureDevice`] instead of real hardware.  The binary uses
//! [`synthetic::ToneDevice`] or [`reader::ReaderDevice`] (raw PCM on stdin).

use std::io;
use std::sync::{Arc, Mutex};

use lanstream_core::AudioFormat;
use thiserror::Error;

pub mod capture_loop;
pub mod fanout;
pub mod mock;
pub mod reader;
pub mod synthetic;

/// Error type for capture device operations.
///
/// Any of these is fatal to the capture loop; nothing retries automatically.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device cannot be used at all (missing, busy, not opened).
    #[error("capture device unavailable: {0}")]
    Unavailable(String),

    /// The device rejected the requested format or chunk size.
    #[error("failed to open capture device: {0}")]
    Open(String),

    /// A read failed after the device was running.
    #[error("capture device read failed: {0}")]
    Read(#[source] io::Error),
}

/// A source of raw PCM.
///
/// Call order is `open` → `start` → `read`… → `stop` → `close`.  The capture
/// loop guarantees `stop` and `close` run even when a read fails.
pub trait CaptureDevice: Send {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    /// Prepares the device to deliver `format` in reads of `chunk_size` bytes.
    fn open(&mut self, format: &AudioFormat, chunk_size: usize) -> Result<(), DeviceError>;

    /// Begins capturing.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Fills as much of `buf` as is available and returns the byte count.
    ///
    /// `Ok(0)` means "nothing right now, try again", not end of stream.  An
    /// exhausted source must report an error instead.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Stops capturing.  Must be harmless if the device never started.
    fn stop(&mut self);

    /// Releases the device.  Must be harmless if the device never opened.
    fn close(&mut self);
}

/// A device shared between the audio server (which keeps it between runs)
/// and the capture thread (which holds the lock while capturing).
pub type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// Wraps a device for use by the server.
pub fn share_device(device: Box<dyn CaptureDevice>) -> SharedDevice {
    Arc::new(Mutex::new(device))
}
