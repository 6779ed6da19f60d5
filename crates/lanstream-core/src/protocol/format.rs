//! Audio format descriptor carried in search responses.
//!
//! The descriptor mirrors what a capture device is opened with: an encoding
//! name plus sample rate, bit depth, channel count, frame size, frame rate and
//! byte order.  Any numeric field may be [`AudioFormat::NOT_SPECIFIED`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample encoding.  Known encodings have fixed wire names; anything else is
/// carried through verbatim as [`AudioEncoding::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AudioEncoding {
    PcmSigned,
    PcmUnsigned,
    PcmFloat,
    Ulaw,
    Alaw,
    Other(String),
}

impl AudioEncoding {
    /// The name written to the wire.
    pub fn name(&self) -> &str {
        match self {
            AudioEncoding::PcmSigned => "PCM_SIGNED",
            AudioEncoding::PcmUnsigned => "PCM_UNSIGNED",
            AudioEncoding::PcmFloat => "PCM_FLOAT",
            AudioEncoding::Ulaw => "ULAW",
            AudioEncoding::Alaw => "ALAW",
            AudioEncoding::Other(name) => name.as_str(),
        }
    }

    /// Resolves a wire name; unknown names become [`AudioEncoding::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "PCM_SIGNED" => AudioEncoding::PcmSigned,
            "PCM_UNSIGNED" => AudioEncoding::PcmUnsigned,
            "PCM_FLOAT" => AudioEncoding::PcmFloat,
            "ULAW" => AudioEncoding::Ulaw,
            "ALAW" => AudioEncoding::Alaw,
            other => AudioEncoding::Other(other.to_string()),
        }
    }
}

impl From<String> for AudioEncoding {
    fn from(name: String) -> Self {
        AudioEncoding::from_name(&name)
    }
}

impl From<AudioEncoding> for String {
    fn from(encoding: AudioEncoding) -> Self {
        encoding.name().to_string()
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full description of a raw PCM stream.
///
/// `PartialEq` is exact field equality; use [`AudioFormat::matches`] to ask
/// whether two descriptors describe compatible streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: f32,
    pub sample_size_bits: i32,
    pub channels: i32,
    /// Bytes per frame (one sample for every channel).
    pub frame_size: i32,
    pub frame_rate: f32,
    pub big_endian: bool,
}

impl AudioFormat {
    /// Marker for a field the producer did not specify.
    pub const NOT_SPECIFIED: i32 = -1;

    /// Builds a linear PCM format, deriving frame size and frame rate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lanstream_core::AudioFormat;
    ///
    /// let cd = AudioFormat::pcm_signed(44_100.0, 16, 2, false);
    /// assert_eq!(cd.frame_size, 4);
    /// assert_eq!(cd.bytes_per_second(), Some(176_400));
    /// ```
    pub fn pcm_signed(sample_rate: f32, sample_size_bits: i32, channels: i32, big_endian: bool) -> Self {
        Self::linear(AudioEncoding::PcmSigned, sample_rate, sample_size_bits, channels, big_endian)
    }

    /// Like [`pcm_signed`](Self::pcm_signed) for any encoding whose frame is
    /// one whole-byte sample per channel.
    pub fn linear(
        encoding: AudioEncoding,
        sample_rate: f32,
        sample_size_bits: i32,
        channels: i32,
        big_endian: bool,
    ) -> Self {
        let frame_size = if sample_size_bits == Self::NOT_SPECIFIED || channels == Self::NOT_SPECIFIED {
            Self::NOT_SPECIFIED
        } else {
            ((sample_size_bits + 7) / 8) * channels
        };
        Self {
            encoding,
            sample_rate,
            sample_size_bits,
            channels,
            frame_size,
            frame_rate: sample_rate,
            big_endian,
        }
    }

    /// Bytes per second of audio, when both frame size and frame rate are known.
    pub fn bytes_per_second(&self) -> Option<usize> {
        if self.frame_size <= 0 || self.frame_rate <= 0.0 {
            return None;
        }
        Some((self.frame_size as f32 * self.frame_rate).round() as usize)
    }

    /// Frame size in bytes, or `None` when unspecified.
    pub fn frame_bytes(&self) -> Option<usize> {
        usize::try_from(self.frame_size).ok().filter(|&n| n > 0)
    }

    /// Compatibility check: same encoding, and every numeric field equal
    /// unless one side leaves it unspecified.  Byte order only matters for
    /// samples wider than one byte.
    pub fn matches(&self, other: &AudioFormat) -> bool {
        fn int_ok(a: i32, b: i32) -> bool {
            a == AudioFormat::NOT_SPECIFIED || b == AudioFormat::NOT_SPECIFIED || a == b
        }
        fn float_ok(a: f32, b: f32) -> bool {
            let unspecified = AudioFormat::NOT_SPECIFIED as f32;
            a == unspecified || b == unspecified || a == b
        }

        self.encoding == other.encoding
            && int_ok(self.channels, other.channels)
            && float_ok(self.sample_rate, other.sample_rate)
            && int_ok(self.sample_size_bits, other.sample_size_bits)
            && int_ok(self.frame_size, other.frame_size)
            && float_ok(self.frame_rate, other.frame_rate)
            && (self.sample_size_bits <= 8
                || other.sample_size_bits <= 8
                || self.big_endian == other.big_endian)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} Hz, {} bit, {} ch, {} bytes/frame, {}",
            self.encoding,
            self.sample_rate,
            self.sample_size_bits,
            self.channels,
            self.frame_size,
            if self.big_endian { "big-endian" } else { "little-endian" }
        )
    }
}
