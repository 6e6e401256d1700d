//! Pure-Rust block store using [`redb`](https://docs.rs/redb).
//!
//! No C dependencies, which suits edge devices where you can't cross-compile
//! SQLite, or when you want a fully Rust-native stack.
//!
//! Enable with `features = ["redb"]`.
//!
//! ```no_run
//! use crdt_log_store::{BlockStore, RedbStore};
//!
//! let store = RedbStore::open("/tmp/blocks.redb").unwrap();
//! store.put(b"hello").unwrap();
//! ```

use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::debug;

use crate::cid::{Cid, CID_LEN};
use crate::traits::BlockStore;

// ── Table definitions ───────────────────────────────────────────────

const BLOCK_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks");

// ── Error type ──────────────────────────────────────────────────────

/// Errors returned by [`RedbStore`] operations.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RedbError(String);

fn err(e: impl std::fmt::Display) -> RedbError {
    RedbError(e.to_string())
}

// ── Store ───────────────────────────────────────────────────────────

/// A pure-Rust block store built on [`redb`].
///
/// Uses a single table mapping raw cid bytes to block bytes.
/// All writes are atomic (each operation runs in its own redb transaction).
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RedbError> {
        let db = Database::create(path).map_err(err)?;
        Self::init(db)
    }

    /// Create an in-memory redb database (for testing).
    pub fn open_in_memory() -> Result<Self, RedbError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, RedbError> {
        // Ensure the table exists by opening a write txn.
        let txn = db.begin_write().map_err(err)?;
        txn.open_table(BLOCK_TABLE).map_err(err)?;
        txn.commit().map_err(err)?;
        debug!("opened redb block store");
        Ok(Self { db })
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> Result<u64, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(BLOCK_TABLE).map_err(err)?;
        table.len().map_err(err)
    }
}

// ── BlockStore ──────────────────────────────────────────────────────

impl BlockStore for RedbStore {
    type Error = RedbError;

    fn put(&self, bytes: &[u8]) -> Result<Cid, RedbError> {
        let cid = Cid::of(bytes);
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut table = txn.open_table(BLOCK_TABLE).map_err(err)?;
            table
                .insert(cid.as_bytes().as_slice(), bytes)
                .map_err(err)?;
        }
        txn.commit().map_err(err)?;
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(BLOCK_TABLE).map_err(err)?;
        match table.get(cid.as_bytes().as_slice()).map_err(err)? {
            Some(guard) => Ok(Some(guard.value().to_vec())),
            None => Ok(None),
        }
    }

    fn remove(&self, cid: &Cid) -> Result<bool, RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        let removed = {
            let mut table = txn.open_table(BLOCK_TABLE).map_err(err)?;
            let previous = table.remove(cid.as_bytes().as_slice()).map_err(err)?;
            previous.is_some()
        };
        txn.commit().map_err(err)?;
        Ok(removed)
    }

    fn cids(&self) -> Result<Vec<Cid>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(BLOCK_TABLE).map_err(err)?;

        let mut cids = Vec::new();
        for item in table.iter().map_err(err)? {
            let (key_guard, _) = item.map_err(err)?;
            let raw = key_guard.value();
            let digest: [u8; CID_LEN] = raw
                .try_into()
                .map_err(|_| RedbError(format!("corrupt block key of {} bytes", raw.len())))?;
            cids.push(Cid::from_bytes(digest));
        }
        Ok(cids)
    }

    fn put_batch(&self, blocks: &[&[u8]]) -> Result<Vec<Cid>, RedbError> {
        let txn = self.db.begin_write().map_err(err)?;
        let mut cids = Vec::with_capacity(blocks.len());
        {
            let mut table = txn.open_table(BLOCK_TABLE).map_err(err)?;
            for bytes in blocks {
                let cid = Cid::of(bytes);
                table
                    .insert(cid.as_bytes().as_slice(), *bytes)
                    .map_err(err)?;
                cids.push(cid);
            }
        }
        txn.commit().map_err(err)?;
        Ok(cids)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
