//! The capture thread: device reads in, fan-out buffer pushes out.
//!
//! # Threading model (for beginners)
//!
//! One dedicated OS thread owns the [`CaptureDevice`] for as long as the loop
//! runs.  It fills one fixed-size chunk at a time (short reads are stitched
//! together, zero-byte reads are retried) and pushes each full chunk to every
//! buffer currently attached through the [`CaptureTap`].
//!
//! Connection threads attach and detach buffers at any moment.  The tap
//! guards its list with its own mutex, and the loop only holds it long
//! enough to copy the list, so pushes never run under that lock and a slow
//! buffer never delays an attach or detach.
//!
//! # Shutdown
//!
//! [`CaptureLoop::stop`] clears the running flag and waits up to
//! [`STOP_WAIT`] for the thread to leave its current read.  Whatever way the
//! thread exits (stop, read error, panic) the device is stopped and then
//! closed, and every attached buffer is closed so consumers wake up.  A
//! thread that does not exit in time is detached; it still holds the device
//! lock, so the next start reports the device as unavailable rather than
//! sharing it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError},
    Arc, Mutex, MutexGuard, TryLockError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lanstream_core::AudioFormat;
use tracing::{debug, error, info, warn};

use super::fanout::FanOutBuffer;
use super::{CaptureDevice, DeviceError, SharedDevice};

/// Upper bound on how long `stop` waits for the capture thread.
pub const STOP_WAIT: Duration = Duration::from_secs(2);

/// Pause after a read that returned nothing, so an idle device is not
/// polled in a tight loop.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Attachments {
    buffers: Vec<Arc<FanOutBuffer>>,
    closed: bool,
}

/// Handle for attaching listener buffers to a running capture loop.
#[derive(Debug, Clone, Default)]
pub struct CaptureTap {
    attachments: Arc<Mutex<Attachments>>,
}

impl CaptureTap {
    /// Starts delivering chunks to `buffer`.  If the loop has already
    /// exited, the buffer is closed immediately instead.
    pub fn attach(&self, buffer: Arc<FanOutBuffer>) -> Arc<FanOutBuffer> {
        let mut attachments = self.lock();
        if attachments.closed {
            buffer.close();
        } else {
            attachments.buffers.push(Arc::clone(&buffer));
        }
        buffer
    }

    /// Stops delivering chunks to `buffer`.  Unknown buffers are ignored.
    pub fn detach(&self, buffer: &Arc<FanOutBuffer>) {
        self.lock().buffers.retain(|b| !Arc::ptr_eq(b, buffer));
    }

    /// Number of buffers currently attached.
    pub fn attached(&self) -> usize {
        self.lock().buffers.len()
    }

    fn snapshot(&self) -> Vec<Arc<FanOutBuffer>> {
        self.lock().buffers.clone()
    }

    fn close_all(&self) {
        let buffers = {
            let mut attachments = self.lock();
            attachments.closed = true;
            std::mem::take(&mut attachments.buffers)
        };
        for buffer in buffers {
            buffer.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Attachments> {
        self.attachments.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A running capture thread.
pub struct CaptureLoop {
    tap: CaptureTap,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    exited: mpsc::Receiver<()>,
    device_name: String,
}

impl CaptureLoop {
    /// Opens and starts `device` on the calling thread, then hands it to a
    /// new capture thread.
    ///
    /// Returns the loop and a receiver that yields the error if the device
    /// later fails.  A failed device ends the loop; it is not retried.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Unavailable`] if another capture loop still holds the
    ///   device or the thread cannot be spawned.
    /// - Whatever `open` or `start` returns.
    pub fn start(
        device: SharedDevice,
        format: &AudioFormat,
        chunk_size: usize,
    ) -> Result<(Self, mpsc::Receiver<DeviceError>), DeviceError> {
        if chunk_size == 0 {
            return Err(DeviceError::Open("chunk size must be non-zero".to_string()));
        }

        let device_name = {
            let mut guard = match device.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    return Err(DeviceError::Unavailable(
                        "device is still held by a previous capture loop".to_string(),
                    ))
                }
            };
            guard.open(format, chunk_size)?;
            if let Err(e) = guard.start() {
                guard.close();
                return Err(e);
            }
            guard.name().to_string()
        };

        let tap = CaptureTap::default();
        let running = Arc::new(AtomicBool::new(true));
        let (failure_tx, failure_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::channel();

        let spawned = {
            let device = Arc::clone(&device);
            let tap = tap.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("lanstream-capture".to_string())
                .spawn(move || {
                    let exit = ExitSignal { tap, exited: exit_tx };
                    run(&device, &exit.tap, &running, chunk_size, &failure_tx);
                })
        };
        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let mut guard = device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.stop();
                guard.close();
                return Err(DeviceError::Unavailable(format!("failed to spawn capture thread: {e}")));
            }
        };

        info!(device = %device_name, %format, chunk_size, "Capture loop started");
        Ok((
            Self {
                tap,
                running,
                worker: Some(worker),
                exited: exit_rx,
                device_name,
            },
            failure_rx,
        ))
    }

    /// A handle connection threads use to attach their buffers.
    pub fn tap(&self) -> CaptureTap {
        self.tap.clone()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// `true` until the capture thread has exited.
    pub fn is_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and waits (bounded) for it to release the device.
    ///
    /// Returns `false` if the thread had to be detached.  Idempotent.
    pub fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return true;
        };
        match self.exited.recv_timeout(STOP_WAIT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(device = %self.device_name, "Capture thread panicked");
                }
                info!(device = %self.device_name, "Capture loop stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    device = %self.device_name,
                    "Capture thread did not exit within {STOP_WAIT:?}; detaching it"
                );
                self.tap.close_all();
                false
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes every buffer and reports the exit when the capture thread ends,
/// including by panic.
struct ExitSignal {
    tap: CaptureTap,
    exited: mpsc::Sender<()>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.tap.close_all();
        let _ = self.exited.send(());
    }
}

/// Stops then closes the device when the read loop ends, however it ends.
struct DeviceGuard<'a>(MutexGuard<'a, Box<dyn CaptureDevice>>);

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        self.0.stop();
        self.0.close();
        debug!(device = self.0.name(), "Capture device released");
    }
}

fn run(
    device: &SharedDevice,
    tap: &CaptureTap,
    running: &AtomicBool,
    chunk_size: usize,
    failures: &mpsc::Sender<DeviceError>,
) {
    let mut device = DeviceGuard(device.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0;

    while running.load(Ordering::Acquire) {
        match device.0.read(&mut chunk[filled..]) {
            Ok(0) => thread::sleep(EMPTY_READ_BACKOFF),
            Ok(n) => {
                filled += n;
                if filled < chunk_size {
                    continue;
                }
                filled = 0;
                // `push` never waits, so one full buffer cannot delay the
                // rest of the snapshot.
                for buffer in tap.snapshot() {
                    // A closed buffer belongs to a departing connection,
                    // which detaches it itself.
                    let _ = buffer.push(&chunk);
                }
            }
            Err(e) => {
                error!(device = device.0.name(), "Capture failed: {e}");
                let _ = failures.send(e);
                break;
            }
        }
    }
    debug!(device = device.0.name(), "Capture loop exiting");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
