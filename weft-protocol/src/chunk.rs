//! Chunk framing — the atomic unit of weft communication.
//!
//! Every chunk on the wire is `descriptor(1) || size(4, big-endian) ||
//! content(size)`. The descriptor values below ARE the protocol; changing
//! them is a breaking change.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Size of the fixed chunk header (descriptor byte + u32 length).
pub const CHUNK_HEADER_LEN: usize = 5;

/// Discriminates the role of a chunk within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkDescriptor {
    /// Routing and identity metadata; always the first chunk.
    Envelope = 0x01,
    /// Optional payload, JSON or raw bytes.
    Data = 0x02,
    /// Optional diagnostic JSON annotations.
    Debug = 0x03,
}

impl TryFrom<u8> for ChunkDescriptor {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ChunkDescriptor::Envelope),
            0x02 => Ok(ChunkDescriptor::Data),
            0x03 => Ok(ChunkDescriptor::Debug),
            other => Err(ProtocolError::MalformedFrame(format!(
                "unknown chunk descriptor: 0x{other:02x}"
            ))),
        }
    }
}

impl From<ChunkDescriptor> for u8 {
    fn from(d: ChunkDescriptor) -> u8 {
        d as u8
    }
}

/// One framed chunk: a descriptor plus its content bytes.
///
/// The wire `size` field is derived from the content, so the
/// `size == content.len()` invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub descriptor: ChunkDescriptor,
    pub content: Vec<u8>,
}

impl MessageChunk {
    pub fn new(descriptor: ChunkDescriptor, content: impl Into<Vec<u8>>) -> Self {
        Self {
            descriptor,
            content: content.into(),
        }
    }

    /// The value of the wire size field.
    pub fn size(&self) -> u32 {
        self.content.len() as u32
    }

    /// Number of bytes this chunk occupies on the wire, header included.
    pub fn wire_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.content.len()
    }

    /// Append the encoded chunk to `dst`.
    pub fn encode_into(&self, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let size = u32::try_from(self.content.len())
            .map_err(|_| ProtocolError::ChunkTooLarge(self.content.len()))?;
        dst.put_u8(self.descriptor.into());
        dst.put_u32(size);
        dst.extend_from_slice(&self.content);
        Ok(())
    }

    /// Decode one chunk from the front of `src`, advancing it past the
    /// consumed bytes.
    pub fn decode(src: &mut &[u8]) -> Result<Self, ProtocolError> {
        if src.remaining() < CHUNK_HEADER_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "truncated chunk header: {} bytes remaining",
                src.remaining()
            )));
        }
        let descriptor = ChunkDescriptor::try_from(src.get_u8())?;
        let size = src.get_u32() as usize;
        if src.remaining() < size {
            return Err(ProtocolError::MalformedFrame(format!(
                "declared chunk size {size} exceeds the {} remaining bytes",
                src.remaining()
            )));
        }
        let content = src[..size].to_vec();
        src.advance(size);
        Ok(Self {
            descriptor,
            content,
        })
    }

    /// Lossy human rendering of the content, used by debug logging.
    pub fn content_to_string(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

impl fmt::Display for MessageChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size: {} bytes - content: {}",
            self.size(),
            self.content_to_string()
        )
    }
}
