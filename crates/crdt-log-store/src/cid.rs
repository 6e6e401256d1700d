//! Content identifiers.
//!
//! A [`Cid`] names a block by the blake3 digest of its bytes. Two blocks with
//! identical bytes always have the same `Cid`, so a `Cid` is both the key a
//! block is stored under and a tamper check for the bytes returned by a
//! backend.

use core::fmt;
use core::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Length of a content identifier in bytes.
pub const CID_LEN: usize = 32;

/// The content identifier of a block: `blake3(bytes)`.
///
/// Renders as lowercase hex. Serializes as a hex string in human-readable
/// formats (JSON) and as raw bytes in binary formats (postcard).
///
/// # Example
///
/// ```
/// use crdt_log_store::Cid;
///
/// let a = Cid::of(b"hello");
/// let b: Cid = a.to_string().parse().unwrap();
/// assert_eq!(a, b);
/// assert_ne!(a, Cid::of(b"world"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Compute the identifier of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    /// Wrap a raw digest.
    pub const fn from_bytes(bytes: [u8; CID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    /// Whether `bytes` hash to this identifier.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Self::of(bytes) == *self
    }
}

impl From<[u8; CID_LEN]> for Cid {
    fn from(bytes: [u8; CID_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", hex::encode(&self.0[..8]))
    }
}

/// Error parsing a [`Cid`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCidError {
    /// The text is not valid hex.
    #[error("invalid hex in content identifier: {0}")]
    InvalidHex(String),
    /// The decoded digest has the wrong length.
    #[error("content identifier must be {CID_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Cid {
    type Err = ParseCidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParseCidError::InvalidHex(e.to_string()))?;
        let digest: [u8; CID_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseCidError::InvalidLength(bytes.len()))?;
        Ok(Self(digest))
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CidVisitor;

        impl<'de> Visitor<'de> for CidVisitor {
            type Value = Cid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {CID_LEN}-byte content identifier")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Cid, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Cid, E> {
                let digest: [u8; CID_LEN] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Cid(digest))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Cid, A::Error> {
                let mut digest = [0u8; CID_LEN];
                for (i, byte) in digest.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Cid(digest))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(CidVisitor)
        } else {
            deserializer.deserialize_bytes(CidVisitor)
        }
    }
}
