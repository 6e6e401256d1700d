//! Lamport logical clock for causal ordering of log entries.
//!
//! A Lamport clock is a `(id, time)` pair:
//! - **`time`** is a counter that every replica advances past the largest
//!   time it has observed, so a child entry always has a larger time than
//!   its parents
//! - **`id`** names the replica (its identity public key) and breaks ties
//!   between concurrent entries that reached the same time
//!
//! # Example
//!
//! ```
//! use crdt_log::clock::LamportClock;
//!
//! let mut clock = LamportClock::new("replica-a");
//! clock.tick();
//! clock.tick();
//! assert_eq!(clock.time(), 2);
//!
//! // Observing a remote clock fast-forwards the local one.
//! let remote = LamportClock::with_time("replica-b", 10);
//! clock.merge(&remote);
//! assert_eq!(clock.time(), 10);
//! assert!(clock.clone().tick().unwrap() > remote);
//! ```

use core::cmp;

use serde::{Deserialize, Serialize};

/// A Lamport timestamp owned by one replica.
///
/// Ordering is total: by `time`, then by `id` lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LamportClock {
    id: String,
    time: u64,
}

impl LamportClock {
    /// Create a clock at time zero.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_time(id, 0)
    }

    /// Create a clock at a given time.
    pub fn with_time(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }

    /// The replica identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current counter value.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Advance the counter by one and return the new timestamp.
    ///
    /// Returns `None`, leaving the clock unchanged, once the counter is at
    /// `u64::MAX`.
    pub fn tick(&mut self) -> Option<Self> {
        self.time = self.time.checked_add(1)?;
        Some(self.clone())
    }

    /// Fast-forward to `other.time` if it is ahead. The id is kept.
    pub fn merge(&mut self, other: &LamportClock) {
        self.time = cmp::max(self.time, other.time);
    }

    /// Fast-forward to `time` if it is ahead.
    pub fn advance_to(&mut self, time: u64) {
        self.time = cmp::max(self.time, time);
    }
}

impl Ord for LamportClock {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for LamportClock {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}
