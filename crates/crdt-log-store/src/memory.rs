use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::cid::Cid;
use crate::traits::BlockStore;

/// In-memory block store.
///
/// All blocks live in a `BTreeMap` behind a read-write lock; nothing
/// touches disk. Ideal for testing and for replicas that rebuild their
/// state from peers on startup.
///
/// # Example
///
/// ```
/// use crdt_log_store::{BlockStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// let cid = store.put(b"block").unwrap();
///
/// assert_eq!(store.get(&cid).unwrap().as_deref(), Some(b"block".as_slice()));
/// ```
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<Cid, Vec<u8>>>,
}

/// Error type for the in-memory backend.
///
/// This backend never actually fails, but the trait requires an error type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("MemoryStore error: {0}")]
pub struct MemoryError(String);

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns `true` if no block is stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Total size of all stored blocks in bytes.
    pub fn total_bytes(&self) -> usize {
        self.blocks.read().values().map(Vec::len).sum()
    }

    /// Overwrite the bytes stored under `cid` without rehashing.
    ///
    /// Only useful to simulate a corrupt or malicious backend in tests.
    #[doc(hidden)]
    pub fn corrupt(&self, cid: &Cid, bytes: Vec<u8>) {
        self.blocks.write().insert(*cid, bytes);
    }
}

impl BlockStore for MemoryStore {
    type Error = MemoryError;

    fn put(&self, bytes: &[u8]) -> Result<Cid, Self::Error> {
        let cid = Cid::of(bytes);
        self.blocks
            .write()
            .entry(cid)
            .or_insert_with(|| bytes.to_vec());
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.blocks.read().get(cid).cloned())
    }

    fn remove(&self, cid: &Cid) -> Result<bool, Self::Error> {
        Ok(self.blocks.write().remove(cid).is_some())
    }

    fn cids(&self) -> Result<Vec<Cid>, Self::Error> {
        Ok(self.blocks.read().keys().copied().collect())
    }

    fn has(&self, cid: &Cid) -> Result<bool, Self::Error> {
        Ok(self.blocks.read().contains_key(cid))
    }

    fn put_batch(&self, blocks: &[&[u8]]) -> Result<Vec<Cid>, Self::Error> {
        let mut map = self.blocks.write();
        let cids = blocks
            .iter()
            .map(|bytes| {
                let cid = Cid::of(bytes);
                map.entry(cid).or_insert_with(|| bytes.to_vec());
                cid
            })
            .collect();
        Ok(cids)
    }
}
