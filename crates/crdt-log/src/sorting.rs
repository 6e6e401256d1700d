//! Sort policies: total orders over entries.
//!
//! A policy decides which of two concurrent entries is "later". Policies may
//! report [`Ordering::Equal`]; [`SortFn`] wraps every policy with a final
//! comparison of entry cids so that two distinct entries never compare
//! equal, which keeps traversal and rendering deterministic on every replica.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::entry::Entry;

type Policy = dyn Fn(&Entry, &Entry) -> Ordering + Send + Sync;

/// A sort policy with a cid fallback.
///
/// # Example
///
/// ```
/// use crdt_log::sorting::{self, SortFn};
///
/// // Newest first by clock, ties broken by replica id then cid.
/// let lww = SortFn::last_write_wins();
///
/// // Any closure works as a custom policy.
/// let by_payload = SortFn::custom(|a, b| a.payload.cmp(&b.payload));
/// # let _ = (lww, by_payload, sorting::sort_by_entry_cid);
/// ```
#[derive(Clone)]
pub struct SortFn {
    policy: Arc<Policy>,
}

impl SortFn {
    /// Wrap an arbitrary policy.
    pub fn custom<F>(policy: F) -> Self
    where
        F: Fn(&Entry, &Entry) -> Ordering + Send + Sync + 'static,
    {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// The default policy: clock time, then clock id.
    pub fn last_write_wins() -> Self {
        Self::custom(last_write_wins)
    }

    /// Order by cid alone.
    pub fn by_entry_cid() -> Self {
        Self::custom(sort_by_entry_cid)
    }

    /// Compare two entries. Only entries with the same cid are `Equal`.
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        (self.policy)(a, b).then_with(|| a.cid.cmp(&b.cid))
    }
}

impl Default for SortFn {
    fn default() -> Self {
        Self::last_write_wins()
    }
}

impl fmt::Debug for SortFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortFn").finish_non_exhaustive()
    }
}

/// Clock time, then clock id. Equal for entries written by the same replica
/// at the same time.
pub fn last_write_wins(a: &Entry, b: &Entry) -> Ordering {
    sort_by_clocks(a, b, |_, _| Ordering::Equal)
}

/// Clock time, then clock id, then `resolve`.
pub fn sort_by_clocks<F>(a: &Entry, b: &Entry, resolve: F) -> Ordering
where
    F: FnOnce(&Entry, &Entry) -> Ordering,
{
    a.clock
        .time()
        .cmp(&b.clock.time())
        .then_with(|| sort_by_clock_id(a, b, resolve))
}

/// Clock id, then `resolve`.
pub fn sort_by_clock_id<F>(a: &Entry, b: &Entry, resolve: F) -> Ordering
where
    F: FnOnce(&Entry, &Entry) -> Ordering,
{
    a.clock.id().cmp(b.clock.id()).then_with(|| resolve(a, b))
}

/// Cid only.
pub fn sort_by_entry_cid(a: &Entry, b: &Entry) -> Ordering {
    a.cid.cmp(&b.cid)
}
