//! Write access control.

use std::collections::BTreeSet;

use crate::entry::Entry;
use crate::identity::IdentityProvider;

/// Decides whether an entry's writer may add it to the log.
///
/// Consulted for every locally appended entry and for every entry merged in
/// from another replica, before the entry is trusted.
pub trait AccessController: Send + Sync {
    /// Return `true` if `entry` may be part of the log.
    fn can_append(&self, entry: &Entry, provider: &dyn IdentityProvider) -> bool;
}

/// Permits every writer. The default controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessController for AllowAll {
    fn can_append(&self, _entry: &Entry, _provider: &dyn IdentityProvider) -> bool {
        true
    }
}

/// Permits writers whose identity id is on a write list.
///
/// The wildcard `"*"` permits everyone.
///
/// # Example
///
/// ```
/// use crdt_log::access::WriteAccess;
///
/// let access = WriteAccess::new(["alice", "bob"]);
/// assert!(access.allows("alice"));
/// assert!(!access.allows("mallory"));
/// assert!(WriteAccess::new(["*"]).allows("anyone"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WriteAccess {
    write: BTreeSet<String>,
}

impl WriteAccess {
    /// Wildcard granting write access to everyone.
    pub const ANYONE: &'static str = "*";

    /// Create a controller from a write list.
    pub fn new<I, S>(write: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            write: write.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a writer.
    pub fn grant(&mut self, id: impl Into<String>) {
        self.write.insert(id.into());
    }

    /// Whether `id` may write.
    pub fn allows(&self, id: &str) -> bool {
        self.write.contains(Self::ANYONE) || self.write.contains(id)
    }
}

impl AccessController for WriteAccess {
    fn can_append(&self, entry: &Entry, _provider: &dyn IdentityProvider) -> bool {
        self.allows(&entry.identity.id)
    }
}
