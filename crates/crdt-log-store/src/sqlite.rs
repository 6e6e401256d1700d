//! SQLite block store using rusqlite.
//!
//! The default on-disk backend for desktop, mobile and edge replicas.
//! Uses WAL mode by default for concurrent read/write performance.
//!
//! # Example
//!
//! ```no_run
//! use crdt_log_store::{BlockStore, SqliteStore};
//!
//! let store = SqliteStore::open("replica.db").unwrap();
//! let cid = store.put(b"block").unwrap();
//!
//! assert_eq!(store.get(&cid).unwrap().unwrap(), b"block");
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::cid::{Cid, CID_LEN};
use crate::traits::BlockStore;

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging. Readers do not block the writer.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// An error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Lock poisoned.
    #[error("sqlite lock poisoned")]
    LockPoisoned,
    /// A stored key is not a valid content identifier.
    #[error("corrupt block key of {0} bytes")]
    CorruptKey(usize),
}

/// SQLite block store.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex` for safe shared access.
/// Creates the schema automatically on first open.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        debug!(journal_mode = config.journal_mode.as_str(), "opened sqlite block store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), SqliteError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), SqliteError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                cid         BLOB PRIMARY KEY,
                data        BLOB NOT NULL,
                stored_at   INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            ) WITHOUT ROWID;",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::LockPoisoned)
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> Result<u64, SqliteError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Get the database file size in bytes (0 for in-memory).
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        let conn = self.lock()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        let conn = self.lock()?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

fn cid_from_row(raw: Vec<u8>) -> Result<Cid, SqliteError> {
    let digest: [u8; CID_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| SqliteError::CorruptKey(raw.len()))?;
    Ok(Cid::from_bytes(digest))
}

impl BlockStore for SqliteStore {
    type Error = SqliteError;

    fn put(&self, bytes: &[u8]) -> Result<Cid, Self::Error> {
        let cid = Cid::of(bytes);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO blocks (cid, data) VALUES (?1, ?2)",
            params![cid.as_bytes().as_slice(), bytes],
        )?;
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT data FROM blocks WHERE cid = ?1",
                params![cid.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn remove(&self, cid: &Cid) -> Result<bool, Self::Error> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM blocks WHERE cid = ?1",
            params![cid.as_bytes().as_slice()],
        )?;
        Ok(removed > 0)
    }

    fn cids(&self) -> Result<Vec<Cid>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT cid FROM blocks ORDER BY cid")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(cid_from_row).collect()
    }

    fn has(&self, cid: &Cid) -> Result<bool, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocks WHERE cid = ?1",
            params![cid.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn put_batch(&self, blocks: &[&[u8]]) -> Result<Vec<Cid>, Self::Error> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut cids = Vec::with_capacity(blocks.len());
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO blocks (cid, data) VALUES (?1, ?2)")?;
            for bytes in blocks {
                let cid = Cid::of(bytes);
                stmt.execute(params![cid.as_bytes().as_slice(), bytes])?;
                cids.push(cid);
            }
        }
        tx.commit()?;
        Ok(cids)
    }
}
