//! Log entries: the immutable, content-addressed nodes of the log DAG.

use std::cmp::Ordering;
use std::sync::Arc;

use crdt_log_store::{BlockStore, Cid};
use serde::{Deserialize, Serialize};

use crate::clock::LamportClock;
use crate::envelope::{BlockKind, Envelope};
use crate::error::LogError;
use crate::identity::{Identity, IdentityDescriptor, IdentityProvider};

type Result<T> = std::result::Result<T, LogError>;

/// Current entry format version.
pub const ENTRY_VERSION: u8 = 2;

/// A single entry in the log DAG.
///
/// Each entry carries an opaque payload, references its parent entries by
/// [`Cid`], snapshots the writer's Lamport clock and is signed by the
/// writer. Its own `cid` is the identifier of its encoded block, so two
/// entries with the same `cid` are byte-identical.
///
/// Entries never change after creation and are shared between logs as
/// `Arc<Entry>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Content identifier of the encoded entry.
    pub cid: Cid,
    /// Id of the log this entry belongs to.
    pub log_id: String,
    /// Opaque application data.
    pub payload: Vec<u8>,
    /// Parent entries (DAG edges), heads of the writer's log first.
    pub next: Vec<Cid>,
    /// Entry format version.
    pub v: u8,
    /// Writer's clock at creation.
    pub clock: LamportClock,
    /// The writer.
    pub identity: IdentityDescriptor,
    /// Signature over `(log_id, payload, next, v, clock)`.
    pub signature: Vec<u8>,
}

/// Signed content of an [`Entry`].
#[derive(Serialize)]
struct SignableContent<'a> {
    log_id: &'a str,
    payload: &'a [u8],
    next: &'a [Cid],
    v: u8,
    clock: &'a LamportClock,
}

/// Stored content of an [`Entry`] (everything except its own `cid`).
#[derive(Serialize)]
struct BlockContent<'a> {
    log_id: &'a str,
    payload: &'a [u8],
    next: &'a [Cid],
    v: u8,
    clock: &'a LamportClock,
    identity: &'a IdentityDescriptor,
    signature: &'a [u8],
}

/// Owned mirror of [`BlockContent`] for decoding. Field order must match.
#[derive(Deserialize)]
struct DecodedBlock {
    log_id: String,
    payload: Vec<u8>,
    next: Vec<Cid>,
    v: u8,
    clock: LamportClock,
    identity: IdentityDescriptor,
    signature: Vec<u8>,
}

impl Entry {
    /// Create, sign and store a new entry.
    ///
    /// The entry block is written to `store`; the returned entry's `cid` is
    /// the identifier the store assigned to it.
    pub fn create<S: BlockStore + ?Sized>(
        store: &S,
        identity: &Identity,
        log_id: &str,
        payload: impl Into<Vec<u8>>,
        next: Vec<Cid>,
        clock: LamportClock,
    ) -> Result<Self> {
        let payload = payload.into();
        let signable = postcard::to_allocvec(&SignableContent {
            log_id,
            payload: &payload,
            next: &next,
            v: ENTRY_VERSION,
            clock: &clock,
        })?;
        let signature = identity.sign(&signable);

        let mut entry = Self {
            cid: Cid::from_bytes([0; 32]),
            log_id: log_id.to_string(),
            payload,
            next,
            v: ENTRY_VERSION,
            clock,
            identity: identity.descriptor().clone(),
            signature,
        };

        let block = entry.to_block()?;
        entry.cid = store.put(&block).map_err(LogError::storage)?;
        Ok(entry)
    }

    /// Load an entry from `store`, checking its bytes against `cid`.
    pub fn fetch<S: BlockStore + ?Sized>(store: &S, cid: &Cid) -> Result<Self> {
        let bytes = store
            .get(cid)
            .map_err(LogError::storage)?
            .ok_or(LogError::EntryNotFound(*cid))?;
        Self::from_block(*cid, &bytes)
    }

    /// Decode an entry block fetched under `cid`.
    pub fn from_block(cid: Cid, bytes: &[u8]) -> Result<Self> {
        let actual = Cid::of(bytes);
        if actual != cid {
            return Err(LogError::CidMismatch {
                expected: cid,
                actual,
            });
        }

        let kind = Envelope::peek_kind(bytes)?;
        if kind != BlockKind::Entry {
            return Err(LogError::UnexpectedBlock { cid, kind });
        }
        let envelope = Envelope::from_bytes(bytes)?;

        let decoded: DecodedBlock = postcard::from_bytes(&envelope.payload)?;
        Ok(Self {
            cid,
            log_id: decoded.log_id,
            payload: decoded.payload,
            next: decoded.next,
            v: decoded.v,
            clock: decoded.clock,
            identity: decoded.identity,
            signature: decoded.signature,
        })
    }

    /// Encode the entry as the block it is stored as.
    pub fn to_block(&self) -> Result<Vec<u8>> {
        let payload = postcard::to_allocvec(&BlockContent {
            log_id: &self.log_id,
            payload: &self.payload,
            next: &self.next,
            v: self.v,
            clock: &self.clock,
            identity: &self.identity,
            signature: &self.signature,
        })?;
        Ok(Envelope::new(self.v, BlockKind::Entry, payload).to_bytes())
    }

    /// The bytes covered by the signature.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(&SignableContent {
            log_id: &self.log_id,
            payload: &self.payload,
            next: &self.next,
            v: self.v,
            clock: &self.clock,
        })?)
    }

    /// Check that `cid` is the identifier of this entry's encoding.
    ///
    /// Used when entries arrive by value (snapshots) rather than by
    /// identifier from a store.
    pub fn verify_cid(&self) -> Result<()> {
        let actual = Cid::of(&self.to_block()?);
        if actual != self.cid {
            return Err(LogError::CidMismatch {
                expected: self.cid,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the entry signature against its identity's public key.
    pub fn verify(provider: &dyn IdentityProvider, entry: &Entry) -> bool {
        let Ok(data) = entry.signable_bytes() else {
            return false;
        };
        provider.verify(&entry.signature, &entry.identity.public_key, &data)
    }

    /// Whether `parent` is one of `child`'s direct parents.
    pub fn is_parent(parent: &Entry, child: &Entry) -> bool {
        child.next.contains(&parent.cid)
    }

    /// The chain of descendants of `entry` within `values`: a child, that
    /// child's child, and so on, ordered by clock time.
    pub fn find_children(entry: &Entry, values: &[Arc<Entry>]) -> Vec<Arc<Entry>> {
        let mut chain = Vec::new();
        let mut prev = entry;

        while let Some(child) = values.iter().find(|e| Entry::is_parent(prev, e)) {
            chain.push(Arc::clone(child));
            prev = child;
        }

        chain.sort_by_key(|e| e.clock.time());
        chain
    }

    /// Order entries by clock (time, then replica id), then by `cid`.
    pub fn compare(a: &Entry, b: &Entry) -> Ordering {
        a.clock.cmp(&b.clock).then_with(|| a.cid.cmp(&b.cid))
    }
}
