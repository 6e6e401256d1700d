use core::fmt;

use crate::cid::Cid;

/// Core trait for content-addressed block persistence.
///
/// Every backend implements this trait. Blocks are opaque bytes keyed by
/// the [`Cid`] of their content: `put` computes the identifier, `get`
/// returns exactly the bytes that were stored under it. The store does not
/// interpret blocks; encoding and decoding entries is the log's concern.
///
/// Methods take `&self` so one store can be shared (behind an `Arc`) by
/// every log replica in a process. Backends synchronize internally.
pub trait BlockStore {
    /// Error type for this backend.
    type Error: fmt::Debug + fmt::Display;

    /// Store a block and return its content identifier.
    ///
    /// Storing the same bytes twice is a no-op that returns the same `Cid`.
    fn put(&self, bytes: &[u8]) -> Result<Cid, Self::Error>;

    /// Retrieve a block by identifier.
    /// Returns `None` if the block is not present.
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Remove a block. Returns `true` if it was present.
    fn remove(&self, cid: &Cid) -> Result<bool, Self::Error>;

    /// List the identifiers of every stored block, in ascending order.
    fn cids(&self) -> Result<Vec<Cid>, Self::Error>;

    /// Check if a block is present.
    fn has(&self, cid: &Cid) -> Result<bool, Self::Error> {
        Ok(self.get(cid)?.is_some())
    }

    /// Store several blocks, returning their identifiers in input order.
    ///
    /// Backends with transactions override this so the whole batch is
    /// written or none of it is. The default stores one block at a time.
    fn put_batch(&self, blocks: &[&[u8]]) -> Result<Vec<Cid>, Self::Error> {
        blocks.iter().map(|bytes| self.put(bytes)).collect()
    }
}


impl<T: BlockStore + ?Sized> BlockStore for std::sync::Arc<T> {
    type Error = T::Error;

    fn put(&self, bytes: &[u8]) -> Result<Cid, Self::Error> {
        (**self).put(bytes)
    }

    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error> {
        (**self).get(cid)
    }

    fn remove(&self, cid: &Cid) -> Result<bool, Self::Error> {
        (**self).remove(cid)
    }

    fn cids(&self) -> Result<Vec<Cid>, Self::Error> {
        (**self).cids()
    }

    fn has(&self, cid: &Cid) -> Result<bool, Self::Error> {
        (**self).has(cid)
    }

    fn put_batch(&self, blocks: &[&[u8]]) -> Result<Vec<Cid>, Self::Error> {
        (**self).put_batch(blocks)
    }
}
