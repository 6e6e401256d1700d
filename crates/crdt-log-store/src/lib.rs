//! # crdt-log-store
//!
//! Content-addressed block stores for [`crdt-log`](https://docs.rs/crdt-log).
//!
//! Every block is named by its [`Cid`], the blake3 digest of its bytes.
//! The log writes entries and log manifests as blocks and reads them back
//! by identifier; the store never interprets them.
//!
//! ## Quick Start
//!
//! ```
//! use crdt_log_store::{BlockStore, Cid, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let cid = store.put(b"hello").unwrap();
//! assert_eq!(cid, Cid::of(b"hello"));
//! assert_eq!(store.get(&cid).unwrap().as_deref(), Some(b"hello".as_slice()));
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, ephemeral replicas |
//! | `SqliteStore` | `sqlite` | Desktop, mobile, edge Linux |
//! | `RedbStore` | `redb` | Pure-Rust edge without C deps |

mod cid;
mod memory;
#[cfg(feature = "redb")]
mod redb;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use cid::{Cid, ParseCidError, CID_LEN};
pub use memory::{MemoryError, MemoryStore};
#[cfg(feature = "redb")]
pub use redb::{RedbError, RedbStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore};
pub use traits::BlockStore;
