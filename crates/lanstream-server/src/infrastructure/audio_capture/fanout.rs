//! Bounded byte queue between the capture loop and one listener.
//!
//! Each connected client gets its own [`FanOutBuffer`].  The capture loop is
//! the only producer; the client's connection thread is the only consumer.
//! Buffers never share a lock, and `push` never waits, so a stalled client
//! only fills its own buffer while the capture loop moves on to the next.
//!
//! # Overflow (for beginners)
//!
//! If a client reads slower than the capture device produces, its buffer
//! fills up.  Something has to give, and it is always the slow client's
//! oldest audio:
//!
//! - [`OverflowPolicy::DropOldest`] (the default) discards the oldest queued
//!   chunks as soon as `capacity` is exceeded.
//! - [`OverflowPolicy::Grace`] lets a client that has read within
//!   `max_wait` fall up to one extra `capacity` behind before anything is
//!   dropped.  A short hiccup (a GC pause, a busy Wi-Fi link) then costs no
//!   audio.  A client silent for longer than `max_wait` is held to
//!   `capacity` like `DropOldest`.
//!
//! Chunks are dropped whole, so a listener never receives half a frame.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// What `push` does when the new chunk does not fit.  Neither policy makes
/// the producer wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest chunks immediately.
    #[default]
    DropOldest,
    /// Allow up to twice the capacity while the consumer has popped within
    /// `max_wait`; otherwise discard the oldest chunks.
    Grace { max_wait: Duration },
}

/// The buffer was closed; no more data will flow through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fan-out buffer is closed")]
pub struct BufferClosed;

/// Why a pop returned without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    #[error(transparent)]
    Closed(#[from] BufferClosed),

    /// The request can never be satisfied under `DropOldest`.
    #[error("pop of {requested} bytes exceeds buffer capacity {capacity}")]
    TooLarge { requested: usize, capacity: usize },
}

#[derive(Debug)]
struct State {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already handed to the consumer.
    head_offset: usize,
    /// Unread bytes across all chunks.
    queued: usize,
    dropped: u64,
    closed: bool,
    /// Creation time until the first pop.
    last_pop: Instant,
}

impl State {
    fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            head_offset: 0,
            queued: 0,
            dropped: 0,
            closed: false,
            last_pop: Instant::now(),
        }
    }

    /// Copies exactly `out.len()` bytes off the front.  Caller checks
    /// `queued >= out.len()` first.
    fn take_into(&mut self, out: &mut [u8]) {
        let mut written = 0;
        while written < out.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let available = &front[self.head_offset..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            let front_len = front.len();
            written += n;
            self.head_offset += n;
            if self.head_offset == front_len {
                self.chunks.pop_front();
                self.head_offset = 0;
            }
        }
        self.queued -= written;
        self.last_pop = Instant::now();
    }

    /// Discards whole chunks from the front until `incoming` more bytes fit
    /// in `limit` (or nothing is left to discard).
    fn make_room(&mut self, incoming: usize, limit: usize) -> usize {
        let mut dropped = 0;
        while self.queued + incoming > limit {
            let Some(front) = self.chunks.pop_front() else {
                break;
            };
            let unread = front.len() - self.head_offset;
            self.head_offset = 0;
            self.queued -= unread;
            dropped += unread;
        }
        self.dropped += dropped as u64;
        dropped
    }
}

/// Single-producer, single-consumer bounded byte queue.
#[derive(Debug)]
pub struct FanOutBuffer {
    state: Mutex<State>,
    readable: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl FanOutBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes (twice that
    /// under [`OverflowPolicy::Grace`]).
    ///
    /// Consumers may pop at most `capacity` bytes at a time.  A single
    /// pushed chunk larger than the limit is still accepted, alone.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(State::new()),
            readable: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Unread bytes currently queued.
    pub fn len(&self) -> usize {
        self.lock().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes discarded by overflow since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.lock().dropped
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closes the buffer and wakes the consumer.  Queued data is discarded.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
    }

    /// Appends one chunk, applying the overflow policy if it does not fit.
    /// Never waits on the consumer.
    ///
    /// Returns the number of previously queued bytes discarded to make room.
    ///
    /// # Errors
    ///
    /// Returns [`BufferClosed`] once [`close`](Self::close) has been called.
    pub fn push(&self, data: &[u8]) -> Result<usize, BufferClosed> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        if state.closed {
            return Err(BufferClosed);
        }

        let limit = self.limit(&state, Instant::now());
        let dropped = state.make_room(data.len(), limit);
        state.chunks.push_back(data.to_vec());
        state.queued += data.len();
        drop(state);
        self.readable.notify_one();
        Ok(dropped)
    }

    /// Byte limit a push must respect right now.
    fn limit(&self, state: &State, now: Instant) -> usize {
        match self.policy {
            OverflowPolicy::DropOldest => self.capacity,
            OverflowPolicy::Grace { max_wait } => {
                if now.saturating_duration_since(state.last_pop) <= max_wait {
                    self.capacity.saturating_mul(2)
                } else {
                    self.capacity
                }
            }
        }
    }

    /// Blocks until `out.len()` bytes are queued, then copies them out.
    ///
    /// # Errors
    ///
    /// Returns [`PopError::TooLarge`] if `out` is longer than the capacity
    /// and [`PopError::Closed`] if the buffer is or becomes closed.
    pub fn pop(&self, out: &mut [u8]) -> Result<(), PopError> {
        self.pop_until(out, None).map(|_| ())
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning
    /// `Ok(false)` without consuming anything.
    ///
    /// # Errors
    ///
    /// Same as [`pop`](Self::pop).
    pub fn pop_timeout(&self, out: &mut [u8], timeout: Duration) -> Result<bool, PopError> {
        self.pop_until(out, Some(Instant::now() + timeout))
    }

    fn pop_until(&self, out: &mut [u8], deadline: Option<Instant>) -> Result<bool, PopError> {
        if out.len() > self.capacity {
            return Err(PopError::TooLarge {
                requested: out.len(),
                capacity: self.capacity,
            });
        }
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(BufferClosed.into());
            }
            if state.queued >= out.len() {
                state.take_into(out);
                return Ok(true);
            }
            state = match deadline {
                None => self
                    .readable
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.readable
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
