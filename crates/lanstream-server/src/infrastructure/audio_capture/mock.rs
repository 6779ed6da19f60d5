//! Mock capture device for unit and integration testing.
//!
//! Lets tests feed exact chunks (or failures) into the capture pipeline and
//! inspect the lifecycle calls the device received, without audio hardware.
//! Clones share state, so a test can keep one clone while the server owns
//! another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use lanstream_core::AudioFormat;

use super::{CaptureDevice, DeviceError};

/// How long `read` sleeps when nothing is scripted, so the capture loop does
/// not spin.
const IDLE_READ: Duration = Duration::from_millis(2);

/// One lifecycle call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Open { format: AudioFormat, chunk_size: usize },
    Start,
    Stop,
    Close,
}

/// A scripted read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Deliver these bytes (truncated to the caller's buffer).
    Data(Vec<u8>),
    /// Deliver nothing this time.
    Empty,
    /// Fail the read with this message.
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockRead>,
    calls: Vec<DeviceCall>,
    fail_open: bool,
    reads: usize,
}

/// A [`CaptureDevice`] driven entirely by the test.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for a future read.
    pub fn push_data(&self, data: impl Into<Vec<u8>>) {
        self.lock().script.push_back(MockRead::Data(data.into()));
    }

    /// Queues an arbitrary read result.
    pub fn push_read(&self, read: MockRead) {
        self.lock().script.push_back(read);
    }

    /// Makes the next `open` fail.
    pub fn fail_open(&self) {
        self.lock().fail_open = true;
    }

    /// Lifecycle calls received so far, in order.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    /// Number of `read` calls received so far.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.lock().script.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&mut self, format: &AudioFormat, chunk_size: usize) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Open {
            format: format.clone(),
            chunk_size,
        });
        if std::mem::take(&mut state.fail_open) {
            return Err(DeviceError::Open("mock configured to fail".to_string()));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.lock().calls.push(DeviceCall::Start);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let next = {
            let mut state = self.lock();
            state.reads += 1;
            state.script.pop_front()
        };
        match next {
            Some(MockRead::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(MockRead::Fail(message)) => Err(DeviceError::Read(io::Error::new(io::ErrorKind::Other, message))),
            Some(MockRead::Empty) => Ok(0),
            None => {
                thread::sleep(IDLE_READ);
                Ok(0)
            }
        }
    }

    fn stop(&mut self) {
        self.lock().calls.push(DeviceCall::Stop);
    }

    fn close(&mut self) {
        self.lock().calls.push(DeviceCall::Close);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
