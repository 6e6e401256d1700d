//! Error types for the log.

use crdt_log_store::Cid;

use crate::envelope::{BlockKind, EnvelopeError};

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A head passed to the constructor is not one of its entries.
    #[error("head {0} is not among the log's entries")]
    HeadNotInEntries(Cid),

    /// The access controller refused an entry.
    #[error("could not append entry, key \"{identity}\" is not allowed to write to the log")]
    PermissionDenied {
        /// Identity id of the refused writer.
        identity: String,
    },

    /// An entry's signature does not verify against its identity.
    #[error("could not validate signature \"{signature}\" for entry \"{cid}\" and key \"{public_key}\"")]
    InvalidSignature {
        /// The offending entry.
        cid: Cid,
        /// Hex-encoded signature.
        signature: String,
        /// Public key the signature was checked against.
        public_key: String,
    },

    /// A block's bytes do not hash to the identifier it was requested by.
    #[error("content identifier mismatch: expected {expected}, got {actual}")]
    CidMismatch {
        /// Identifier the block was requested or announced as.
        expected: Cid,
        /// Identifier of the bytes actually received.
        actual: Cid,
    },

    /// The logical clock has no time left after the newest entry.
    #[error("clock overflow: no logical time exists after {0}")]
    ClockOverflow(u64),

    /// A requested block is not in the store.
    #[error("entry {0} not found")]
    EntryNotFound(Cid),

    /// A block holds something other than what was expected.
    #[error("block {cid} is a {kind:?}, not the expected kind")]
    UnexpectedBlock {
        /// The block.
        cid: Cid,
        /// What the block actually contains.
        kind: BlockKind,
    },

    /// Block store backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed block envelope.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl LogError {
    pub(crate) fn storage(e: impl core::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<postcard::Error> for LogError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
