//! # crdt-log
//!
//! An append-only, content-addressed operation log that replicas can merge
//! without coordination.
//!
//! The log is a grow-only set (G-Set) of immutable [`Entry`] values. Each
//! entry is stored as a block named by the hash of its bytes, points at the
//! entries that were newest when it was written, carries a Lamport clock
//! and is signed by its writer. The `next` pointers form a Merkle DAG, and
//! the clock plus a deterministic tie-breaker order concurrent entries the
//! same way on every replica.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use crdt_log::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let access: Arc<dyn AccessController> = Arc::new(AllowAll);
//! let identity = Arc::new(Identity::generate("device-1"));
//!
//! let mut log = Log::builder(store, access, identity)
//!     .log_id("notes")
//!     .build()
//!     .unwrap();
//!
//! log.append("one").unwrap();
//! log.append("two").unwrap();
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.clock().time(), 2);
//! assert_eq!(log.to_string(), "two\n└─one");
//! ```
//!
//! ## Building blocks
//!
//! - [`clock::LamportClock`] - logical time per replica
//! - [`sorting::SortFn`] - total order over entries (last write wins by default)
//! - [`Entry`] - signed DAG node, created and fetched through a [`BlockStore`]
//! - [`Log`] - append, join, traversal, heads and tails
//! - [`io`] - loading logs from manifests, entries and snapshots
//! - [`access`] and [`identity`] - who may write and how writes are verified
//!
//! Block stores live in [`crdt_log_store`]: an in-memory store, plus redb
//! and SQLite backends behind feature flags.

#![warn(missing_docs)]

pub mod access;
pub mod clock;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod io;
pub mod log;
pub mod prelude;
pub mod sorting;

pub use access::{AccessController, AllowAll, WriteAccess};
pub use clock::LamportClock;
pub use entry::{Entry, ENTRY_VERSION};
pub use error::LogError;
pub use identity::{Ed25519Provider, Identity, IdentityDescriptor, IdentityProvider};
pub use io::LoadOptions;
pub use log::{find_heads, find_tail_cids, find_tails, Log, LogBuilder, LogManifest, LogSnapshot};
pub use sorting::SortFn;

pub use crdt_log_store::{BlockStore, Cid, MemoryStore};
