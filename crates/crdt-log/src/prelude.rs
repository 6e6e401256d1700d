//! Convenient re-exports for common usage.
//!
//! ```
//! use crdt_log::prelude::*;
//! ```

pub use crate::access::{AccessController, AllowAll, WriteAccess};
pub use crate::clock::LamportClock;
pub use crate::entry::Entry;
pub use crate::error::LogError;
pub use crate::identity::{Identity, IdentityProvider};
pub use crate::io::LoadOptions;
pub use crate::log::{Log, LogManifest, LogSnapshot};
pub use crate::sorting::SortFn;

pub use crdt_log_store::{BlockStore, Cid, MemoryStore};
