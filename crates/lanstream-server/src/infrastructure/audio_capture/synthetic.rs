//! A sine-tone generator that behaves like a capture device.
//!
//! Useful for checking a listener setup end to end without any input
//! hardware.  By default reads are paced to real time, so a listener
//! receives exactly `bytes_per_second` of audio per second, as it would from
//! a microphone.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use lanstream_core::{AudioEncoding, AudioFormat};

use super::{CaptureDevice, DeviceError};

/// Peak level as a fraction of full scale.
const DEFAULT_AMPLITUDE: f64 = 0.5;

#[derive(Debug)]
struct ToneState {
    format: AudioFormat,
    sample_bytes: usize,
    channels: usize,
    frame_bytes: usize,
    phase: f64,
    step: f64,
    started: Option<Instant>,
    frames_emitted: u64,
}

/// Generates a continuous sine tone in the opened format.
#[derive(Debug)]
pub struct ToneDevice {
    name: String,
    frequency: f64,
    amplitude: f64,
    paced: bool,
    state: Option<ToneState>,
}

impl ToneDevice {
    /// A real-time paced tone at `frequency` Hz.
    pub fn new(frequency: f32) -> Self {
        Self {
            name: format!("tone {frequency} Hz"),
            frequency: f64::from(frequency),
            amplitude: DEFAULT_AMPLITUDE,
            paced: true,
            state: None,
        }
    }

    /// Disables real-time pacing: every read returns immediately.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Frames generated since `start`.
    pub fn frames_emitted(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.frames_emitted)
    }
}

impl CaptureDevice for ToneDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: &AudioFormat, chunk_size: usize) -> Result<(), DeviceError> {
        let supported = match format.encoding {
            AudioEncoding::PcmSigned | AudioEncoding::PcmUnsigned => {
                matches!(format.sample_size_bits, 8 | 16 | 24 | 32)
            }
            AudioEncoding::PcmFloat => matches!(format.sample_size_bits, 32 | 64),
            _ => false,
        };
        if !supported {
            return Err(DeviceError::Open(format!(
                "tone generator cannot produce {} at {} bits",
                format.encoding, format.sample_size_bits
            )));
        }
        if format.sample_rate <= 0.0 || format.channels <= 0 {
            return Err(DeviceError::Open(format!("unusable format {format}")));
        }

        let sample_bytes = (format.sample_size_bits / 8) as usize;
        let channels = format.channels as usize;
        let frame_bytes = sample_bytes * channels;
        if chunk_size < frame_bytes {
            return Err(DeviceError::Open(format!(
                "chunk of {chunk_size} bytes is smaller than one {frame_bytes}-byte frame"
            )));
        }

        self.state = Some(ToneState {
            format: format.clone(),
            sample_bytes,
            channels,
            frame_bytes,
            phase: 0.0,
            step: TAU * self.frequency / f64::from(format.sample_rate),
            started: None,
            frames_emitted: 0,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DeviceError::Unavailable("tone device not opened".to_string()))?;
        state.started = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DeviceError::Unavailable("tone device not opened".to_string()))?;
        let started = state
            .started
            .ok_or_else(|| DeviceError::Unavailable("tone device not started".to_string()))?;

        let frames = buf.len() / state.frame_bytes;
        if frames == 0 {
            return Ok(0);
        }

        if self.paced {
            let due = (state.frames_emitted + frames as u64) as f64 / f64::from(state.format.sample_rate);
            let ready_at = started + Duration::from_secs_f64(due);
            let now = Instant::now();
            if ready_at > now {
                thread::sleep(ready_at - now);
            }
        }

        for frame in buf[..frames * state.frame_bytes].chunks_exact_mut(state.frame_bytes) {
            let value = state.phase.sin() * self.amplitude;
            for sample in frame.chunks_exact_mut(state.sample_bytes).take(state.channels) {
                encode_sample(value, &state.format, sample);
            }
            state.phase = (state.phase + state.step) % TAU;
        }
        state.frames_emitted += frames as u64;
        Ok(frames * state.frame_bytes)
    }

    fn stop(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.started = None;
        }
    }

    fn close(&mut self) {
        self.state = None;
    }
}

/// Writes one sample in `value` (-1.0..=1.0) into `out` using `format`'s
/// encoding, width and byte order.
fn encode_sample(value: f64, format: &AudioFormat, out: &mut [u8]) {
    let width = out.len();
    let mut write = |le: &[u8]| {
        if format.big_endian {
            for (dst, src) in out.iter_mut().zip(le.iter().rev()) {
                *dst = *src;
            }
        } else {
            out.copy_from_slice(le);
        }
    };

    match (&format.encoding, width) {
        (AudioEncoding::PcmFloat, 4) => write(&(value as f32).to_le_bytes()),
        (AudioEncoding::PcmFloat, _) => write(&value.to_le_bytes()),
        (encoding, width) => {
            let bits = width * 8;
            let full_scale = ((1i64 << (bits - 1)) - 1) as f64;
            let mut sample = (value * full_scale).round() as i64;
            if *encoding == AudioEncoding::PcmUnsigned {
                sample += 1i64 << (bits - 1);
            }
            write(&sample.to_le_bytes()[..width]);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
