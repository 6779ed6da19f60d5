//! Raw PCM from any byte stream (stdin, a file, a pipe from another tool).
//!
//! The stream must already be in the configured format; nothing is
//! converted.  End of input is reported as a device error so the server
//! notices that the source has gone away.

use std::io::{self, Read};

use lanstream_core::AudioFormat;

use super::{CaptureDevice, DeviceError};

/// A [`CaptureDevice`] reading from a [`Read`] implementation.
pub struct ReaderDevice<R> {
    name: String,
    reader: R,
    opened: bool,
    started: bool,
}

impl<R: Read + Send> ReaderDevice<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            opened: false,
            started: false,
        }
    }

    /// Gives back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl ReaderDevice<io::Stdin> {
    /// Reads raw PCM from this process's standard input.
    pub fn stdin() -> Self {
        Self::new("stdin", io::stdin())
    }
}

impl<R: Read + Send> CaptureDevice for ReaderDevice<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, _format: &AudioFormat, chunk_size: usize) -> Result<(), DeviceError> {
        if chunk_size == 0 {
            return Err(DeviceError::Open("chunk size must be non-zero".to_string()));
        }
        self.opened = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError::Unavailable(format!("{} not opened", self.name)));
        }
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::Unavailable(format!("{} not started", self.name)));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match self.reader.read(buf) {
            Ok(0) => Err(DeviceError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} reached end of input", self.name),
            ))),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(DeviceError::Read(e)),
        }
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn format() -> AudioFormat {
        AudioFormat::pcm_signed(8_000.0, 8, 1, false)
    }

    #[test]
    fn test_reads_bytes_then_reports_end_of_input() {
        // Arrange
        let mut device = ReaderDevice::new("cursor", Cursor::new(vec![1u8, 2, 3]));
        device.open(&format(), 16).unwrap();
        device.start().unwrap();
        let mut buf = [0u8; 16];

        // Act
        let first = device.read(&mut buf).unwrap();
        let second = device.read(&mut buf);

        // Assert
        assert_eq!(first, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        match second {
            Err(DeviceError::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected end-of-input error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_before_start_is_unavailable() {
        let mut device = ReaderDevice::new("cursor", Cursor::new(vec![1u8]));
        let mut buf = [0u8; 4];
        assert!(matches!(device.read(&mut buf), Err(DeviceError::Unavailable(_))));
    }

    #[test]
    fn test_start_requires_open() {
        let mut device = ReaderDevice::new("cursor", Cursor::new(Vec::<u8>::new()));
        assert!(device.start().is_err());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut device = ReaderDevice::new("cursor", Cursor::new(Vec::<u8>::new()));
        assert!(matches!(device.open(&format(), 0), Err(DeviceError::Open(_))));
    }
}
