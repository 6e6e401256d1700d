//! Block envelope for everything the log writes to a block store.
//!
//! Binary format (3 bytes overhead):
//! ```text
//! [MAGIC: 0xCE][VERSION: u8][KIND: u8][PAYLOAD: N bytes]
//! ```
//!
//! The loader uses the kind byte to tell entries from log manifests and to
//! reject foreign blocks before attempting to decode them.

/// Magic byte identifying crdt-log blocks.
pub const MAGIC_BYTE: u8 = 0xCE;

/// Size of the envelope header in bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 3;

/// Identifies the kind of block stored in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// A log entry (postcard payload).
    Entry = 1,
    /// A log manifest `{ id, heads }` (JSON payload).
    Manifest = 2,
}

impl BlockKind {
    /// Convert from a raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Entry),
            2 => Some(Self::Manifest),
            _ => None,
        }
    }
}

/// A versioned envelope wrapping a serialized block.
///
/// # Example
///
/// ```
/// use crdt_log::envelope::{BlockKind, Envelope};
///
/// let envelope = Envelope::new(2, BlockKind::Entry, b"payload".to_vec());
/// let bytes = envelope.to_bytes();
/// let decoded = Envelope::from_bytes(&bytes).unwrap();
///
/// assert_eq!(decoded.version, 2);
/// assert_eq!(decoded.kind, BlockKind::Entry);
/// assert_eq!(decoded.payload, b"payload");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Format version of the payload.
    pub version: u8,
    /// Kind of block contained.
    pub kind: BlockKind,
    /// Serialized block data.
    pub payload: Vec<u8>,
}

/// Error parsing a block envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Data is too short to contain a valid envelope.
    #[error("data too short for block envelope")]
    TooShort,
    /// Missing or incorrect magic byte.
    #[error("invalid magic byte: 0x{0:02X}, expected 0xCE")]
    InvalidMagic(u8),
    /// Unknown block kind byte.
    #[error("unknown block kind: {0}")]
    UnknownKind(u8),
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(version: u8, kind: BlockKind, payload: Vec<u8>) -> Self {
        Self {
            version,
            kind,
            payload,
        }
    }

    /// Serialize the envelope to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.push(self.version);
        bytes.push(self.kind as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse an envelope from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(EnvelopeError::TooShort);
        }

        if data[0] != MAGIC_BYTE {
            return Err(EnvelopeError::InvalidMagic(data[0]));
        }

        let version = data[1];
        let kind = BlockKind::from_byte(data[2]).ok_or(EnvelopeError::UnknownKind(data[2]))?;
        let payload = data[ENVELOPE_HEADER_SIZE..].to_vec();

        Ok(Self {
            version,
            kind,
            payload,
        })
    }

    /// Peek at the block kind without copying the payload.
    pub fn peek_kind(data: &[u8]) -> Result<BlockKind, EnvelopeError> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(EnvelopeError::TooShort);
        }
        if data[0] != MAGIC_BYTE {
            return Err(EnvelopeError::InvalidMagic(data[0]));
        }
        BlockKind::from_byte(data[2]).ok_or(EnvelopeError::UnknownKind(data[2]))
    }
}
