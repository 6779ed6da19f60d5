//! Protocol module containing the field codec, the audio format descriptor
//! and the discovery messages.

pub mod codec;
pub mod format;
pub mod messages;

pub use codec::{read_frame, write_frame, PacketBuilder, PacketReader, ProtocolError, MAGIC, MAX_FRAME_LEN};
pub use format::{AudioEncoding, AudioFormat};
pub use messages::*;
