//! Typed binary field writer and reader with a magic-prefix guard.
//!
//! Every packet starts with the same prefix:
//! ```text
//! [magic_len:2][magic:"LANSTREAM/1"][fields...]
//! ```
//! All multi-byte integers are big-endian.  Field encodings:
//!
//! | Field        | Encoding                                                   |
//! |--------------|------------------------------------------------------------|
//! | `i32`/`u32`  | 4 bytes                                                    |
//! | `f32`        | 4 bytes, IEEE-754 bit pattern                              |
//! | `bool`       | 1 byte, `0` or `1` (any non-zero byte reads as `true`)     |
//! | string       | `u16` byte length, then UTF-8                              |
//! | bytes        | `u32` byte length, then raw bytes                          |
//! | IP address   | `u8` length (4 or 16), then the octets                     |
//! | audio format | string, f32, i32, i32, i32, f32, bool (see [`AudioFormat`])|
//!
//! For stream transports (the TCP control endpoint) a packet is wrapped in a
//! frame: `[len:4][packet:len]`, see [`write_frame`] and [`read_frame`].

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::protocol::format::{AudioEncoding, AudioFormat};

/// Protocol identity and version.  Changing any byte of this string makes the
/// new build incompatible with every old one, which is the intent.
pub const MAGIC: &str = "LANSTREAM/1";

/// Largest packet accepted inside a stream frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors that can occur while reading a packet or a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes do not start with [`MAGIC`]: a foreign sender or an
    /// incompatible version.
    #[error("protocol mismatch: packet does not start with {:?}", MAGIC)]
    ProtocolMismatch,

    /// A field ran past the end of the packet.
    #[error("insufficient data: need {needed} more bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The packet type ordinal is not in the type table.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(i32),

    /// A field decoded but its value is out of range.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A stream frame announced a length above [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Underlying stream failure while reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Accumulates typed fields after the magic prefix.
///
/// Writers return `&mut Self` so fields can be chained; [`build`](Self::build)
/// consumes the builder and yields the finished packet.
///
/// # Examples
///
/// ```rust
/// use lanstream_core::{PacketBuilder, PacketReader};
///
/// let mut builder = PacketBuilder::new();
/// builder.write_i32(8000).write_bool(true).write_string("hello");
/// let bytes = builder.build();
///
/// let mut reader = PacketReader::new(&bytes).unwrap();
/// assert_eq!(reader.read_i32().unwrap(), 8000);
/// assert!(reader.read_bool().unwrap());
/// assert_eq!(reader.read_string().unwrap(), "hello");
/// ```
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    buf: Vec<u8>,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    /// Starts a packet with the magic prefix already written.
    pub fn new() -> Self {
        let mut builder = Self {
            buf: Vec::with_capacity(64),
        };
        builder.write_string(MAGIC);
        builder
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        self
    }

    /// Writes a `u16` length prefix and the UTF-8 bytes.  Strings longer
    /// than `u16::MAX` bytes are cut at the last char boundary that fits.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.extend_from_slice(&(end as u16).to_be_bytes());
        self.buf.extend_from_slice(&value.as_bytes()[..end]);
        self
    }

    /// Writes a `u32` length prefix and the raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value);
        self
    }

    /// Writes an address as its octet count followed by the octets.
    pub fn write_address(&mut self, addr: IpAddr) -> &mut Self {
        match addr {
            IpAddr::V4(v4) => {
                self.write_u8(4);
                self.buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.write_u8(16);
                self.buf.extend_from_slice(&v6.octets());
            }
        }
        self
    }

    pub fn write_format(&mut self, format: &AudioFormat) -> &mut Self {
        self.write_string(format.encoding.name())
            .write_f32(format.sample_rate)
            .write_i32(format.sample_size_bits)
            .write_i32(format.channels)
            .write_i32(format.frame_size)
            .write_f32(format.frame_rate)
            .write_bool(format.big_endian)
    }

    /// Finishes the packet.
    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Cursor over a received packet.  Construction validates the magic prefix,
/// so a `PacketReader` only ever exists for bytes that claim to be ours.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Checks the magic prefix and positions the cursor after it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ProtocolMismatch`] when the prefix is missing,
    /// truncated or different.  No other field is touched in that case.
    pub fn new(buf: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut reader = Self { buf, pos: 0 };
        let magic = reader
            .take_string_bytes()
            .map_err(|_| ProtocolError::ProtocolMismatch)?;
        if magic != MAGIC.as_bytes() {
            return Err(ProtocolError::ProtocolMismatch);
        }
        Ok(reader)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take_array()?)))
    }

    /// Reads an `i32` and checks that it is a valid TCP/UDP port.
    pub fn read_port(&mut self) -> Result<u16, ProtocolError> {
        let raw = self.read_i32()?;
        u16::try_from(raw)
            .map_err(|_| ProtocolError::MalformedPayload(format!("port out of range: {raw}")))
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.take_string_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_address(&mut self) -> Result<IpAddr, ProtocolError> {
        match self.read_u8()? {
            4 => Ok(IpAddr::V4(Ipv4Addr::from(self.take_array::<4>()?))),
            16 => Ok(IpAddr::V6(Ipv6Addr::from(self.take_array::<16>()?))),
            other => Err(ProtocolError::MalformedPayload(format!(
                "address length must be 4 or 16, got {other}"
            ))),
        }
    }

    pub fn read_format(&mut self) -> Result<AudioFormat, ProtocolError> {
        Ok(AudioFormat {
            encoding: AudioEncoding::from_name(&self.read_string()?),
            sample_rate: self.read_f32()?,
            sample_size_bits: self.read_i32()?,
            channels: self.read_i32()?,
            frame_size: self.read_i32()?,
            frame_rate: self.read_f32()?,
            big_endian: self.read_bool()?,
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.remaining();
        if len > available {
            return Err(ProtocolError::InsufficientData {
                needed: len,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_string_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = u16::from_be_bytes(self.take_array()?) as usize;
        self.take(len)
    }
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Writes one packet as a length-prefixed frame and flushes the writer.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] for packets above
/// [`MAX_FRAME_LEN`] and [`ProtocolError::Io`] for write failures.
pub fn write_frame<W: Write>(writer: &mut W, packet: &[u8]) -> Result<(), ProtocolError> {
    if packet.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: packet.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(packet.len() as u32).to_be_bytes())?;
    writer.write_all(packet)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] before allocating when the
/// announced length is above [`MAX_FRAME_LEN`], and [`ProtocolError::Io`]
/// (including `UnexpectedEof`) when the stream ends early.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut packet = vec![0u8; len];
    reader.read_exact(&mut packet)?;
    Ok(packet)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
