//! The replicated log.
//!
//! A [`Log`] is a grow-only set of [`Entry`] values linked into a DAG by
//! their `next` pointers, plus the indexes needed to append to it and merge
//! it with other replicas:
//!
//! - `entry_index`: every entry, by cid
//! - `heads_index`: entries no other entry references (the frontier)
//! - `nexts_index`: for each referenced cid, the last child seen pointing at it
//!
//! Merging two replicas with [`Log::join`] is commutative, associative and
//! idempotent, so replicas that have seen the same entries hold the same
//! log regardless of the order in which they joined.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use crdt_log::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let access: Arc<dyn AccessController> = Arc::new(AllowAll);
//!
//! let mut alice = Log::builder(store.clone(), access.clone(), Arc::new(Identity::generate("alice")))
//!     .log_id("chat")
//!     .build()
//!     .unwrap();
//! let mut bob = Log::builder(store, access, Arc::new(Identity::generate("bob")))
//!     .log_id("chat")
//!     .build()
//!     .unwrap();
//!
//! alice.append("hi bob").unwrap();
//! bob.append("hi alice").unwrap();
//!
//! alice.join(&bob, None).unwrap();
//! bob.join(&alice, None).unwrap();
//!
//! assert_eq!(alice.len(), 2);
//! assert_eq!(alice.values(), bob.values());
//! ```

use std::cmp;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crdt_log_store::{BlockStore, Cid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::AccessController;
use crate::clock::LamportClock;
use crate::entry::Entry;
use crate::envelope::{BlockKind, Envelope};
use crate::error::LogError;
use crate::identity::Identity;
use crate::sorting::SortFn;

type Result<T> = std::result::Result<T, LogError>;

/// Format version of stored manifests.
pub const MANIFEST_VERSION: u8 = 1;

/// The JSON form of a log: its id and head cids, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogManifest {
    /// Log id.
    pub id: String,
    /// Head cids, most recent first.
    pub heads: Vec<Cid>,
}

/// A full, self-contained copy of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    /// Log id.
    pub id: String,
    /// Head entries, most recent first.
    pub heads: Vec<Entry>,
    /// All entries, oldest first.
    pub values: Vec<Entry>,
}

/// A replica of an append-only log.
pub struct Log<S: BlockStore> {
    id: String,
    storage: Arc<S>,
    access: Arc<dyn AccessController>,
    identity: Arc<Identity>,
    entry_index: BTreeMap<Cid, Arc<Entry>>,
    heads_index: BTreeMap<Cid, Arc<Entry>>,
    nexts_index: BTreeMap<Cid, Cid>,
    clock: LamportClock,
    sort: SortFn,
}

/// Builder for [`Log`].
pub struct LogBuilder<S: BlockStore> {
    storage: Arc<S>,
    access: Arc<dyn AccessController>,
    identity: Arc<Identity>,
    log_id: Option<String>,
    entries: Vec<Arc<Entry>>,
    heads: Option<Vec<Arc<Entry>>>,
    clock: Option<LamportClock>,
    sort: Option<SortFn>,
}

impl<S: BlockStore> LogBuilder<S> {
    /// Set the log id. Defaults to the current time in milliseconds.
    pub fn log_id(mut self, id: impl Into<String>) -> Self {
        self.log_id = Some(id.into());
        self
    }

    /// Start from existing entries.
    pub fn entries<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<Entry>>,
    {
        self.entries = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Set the heads explicitly. Defaults to [`find_heads`] of the entries.
    pub fn heads<I>(mut self, heads: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<Entry>>,
    {
        self.heads = Some(heads.into_iter().map(Into::into).collect());
        self
    }

    /// Start the clock at least at `clock.time`.
    pub fn clock(mut self, clock: LamportClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the sort policy. Defaults to [`SortFn::last_write_wins`].
    pub fn sort_fn(mut self, sort: SortFn) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Build the log.
    ///
    /// Fails with [`LogError::HeadNotInEntries`] if an explicit head is not
    /// one of the entries.
    pub fn build(self) -> Result<Log<S>> {
        let entry_index: BTreeMap<Cid, Arc<Entry>> = self
            .entries
            .iter()
            .map(|e| (e.cid, Arc::clone(e)))
            .collect();

        let heads = match self.heads {
            Some(heads) => heads,
            None => find_heads(&self.entries),
        };
        let mut heads_index = BTreeMap::new();
        for head in heads {
            if !entry_index.contains_key(&head.cid) {
                return Err(LogError::HeadNotInEntries(head.cid));
            }
            heads_index.insert(head.cid, head);
        }

        let nexts_index = index_nexts(entry_index.values());

        let time = cmp::max(
            self.clock.map_or(0, |c| c.time()),
            max_clock_time(heads_index.values()),
        );
        let clock = LamportClock::with_time(self.identity.public_key(), time);

        Ok(Log {
            id: self.log_id.unwrap_or_else(random_id),
            storage: self.storage,
            access: self.access,
            identity: self.identity,
            entry_index,
            heads_index,
            nexts_index,
            clock,
            sort: self.sort.unwrap_or_default(),
        })
    }
}

impl<S: BlockStore> Log<S> {
    /// Start building a log backed by `storage`.
    pub fn builder(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
    ) -> LogBuilder<S> {
        LogBuilder {
            storage,
            access,
            identity,
            log_id: None,
            entries: Vec::new(),
            heads: None,
            clock: None,
            sort: None,
        }
    }

    /// The log id shared by all replicas.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This replica's clock.
    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entry_index.len()
    }

    /// Whether the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entry_index.is_empty()
    }

    /// Look up an entry by cid.
    pub fn get(&self, cid: &Cid) -> Option<&Arc<Entry>> {
        self.entry_index.get(cid)
    }

    /// Whether the log contains `cid`.
    pub fn has(&self, cid: &Cid) -> bool {
        self.entry_index.contains_key(cid)
    }

    /// All entries in cid order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<Entry>> {
        self.entry_index.values()
    }

    /// The backing block store.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The local writer.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The active sort policy.
    pub fn sort_fn(&self) -> &SortFn {
        &self.sort
    }

    /// All entries, oldest first.
    pub fn values(&self) -> Vec<Arc<Entry>> {
        let mut values = self.traverse(&self.heads(), None);
        values.reverse();
        values
    }

    /// Head entries, most recent first.
    pub fn heads(&self) -> Vec<Arc<Entry>> {
        let mut heads: Vec<_> = self.heads_index.values().cloned().collect();
        heads.sort_by(|a, b| self.sort.compare(b, a));
        heads
    }

    /// Entries that reference entries missing from the log, plus entries
    /// with no parents.
    pub fn tails(&self) -> Vec<Arc<Entry>> {
        find_tails(&self.values())
    }

    /// Cids referenced by the log but not contained in it.
    pub fn tail_cids(&self) -> Vec<Cid> {
        find_tail_cids(&self.values())
    }

    /// Walk the DAG from `roots`, newest first.
    ///
    /// The entry popped next is always the greatest remaining one under the
    /// sort policy, so the order depends only on `roots` and the policy.
    /// Parents not present in this log are skipped. Stops after `amount`
    /// entries if given.
    pub fn traverse(&self, roots: &[Arc<Entry>], amount: Option<usize>) -> Vec<Arc<Entry>> {
        let limit = amount.unwrap_or(usize::MAX);
        let mut traversed = BTreeSet::new();
        // Ascending by the sort policy; the next entry is at the end.
        let mut stack: Vec<Arc<Entry>> = Vec::with_capacity(roots.len());
        for root in roots {
            if traversed.insert(root.cid) {
                self.push_sorted(&mut stack, Arc::clone(root));
            }
        }

        let mut result = Vec::new();
        while result.len() < limit {
            let Some(entry) = stack.pop() else {
                break;
            };
            for next in &entry.next {
                let Some(parent) = self.entry_index.get(next) else {
                    continue;
                };
                if traversed.insert(parent.cid) {
                    self.push_sorted(&mut stack, Arc::clone(parent));
                }
            }
            result.push(entry);
        }
        result
    }

    fn push_sorted(&self, stack: &mut Vec<Arc<Entry>>, entry: Arc<Entry>) {
        let idx = stack.partition_point(|e| self.sort.compare(e, &entry) == cmp::Ordering::Less);
        stack.insert(idx, entry);
    }

    /// Append `payload` as a new entry pointing at the current heads.
    pub fn append(&mut self, payload: impl Into<Vec<u8>>) -> Result<Arc<Entry>> {
        self.append_with(payload, 1)
    }

    /// Append `payload`, additionally pointing at up to `pointer_count`
    /// recent entries (at least as many as there are heads).
    ///
    /// On a permission error no index and not the clock are changed. Fails
    /// with [`LogError::ClockOverflow`] if the newest entry is already at
    /// `u64::MAX`.
    pub fn append_with(
        &mut self,
        payload: impl Into<Vec<u8>>,
        pointer_count: usize,
    ) -> Result<Arc<Entry>> {
        let heads = self.heads();
        let latest = cmp::max(self.clock.time(), max_clock_time(&heads));
        let mut clock = LamportClock::with_time(self.clock.id(), latest);
        let clock = clock.tick().ok_or(LogError::ClockOverflow(latest))?;

        let references = self.traverse(&heads, Some(cmp::max(pointer_count, heads.len())));
        let mut seen = BTreeSet::new();
        let next: Vec<Cid> = heads
            .iter()
            .chain(&references)
            .map(|e| e.cid)
            .filter(|cid| seen.insert(*cid))
            .collect();

        let entry = Arc::new(Entry::create(
            self.storage.as_ref(),
            &self.identity,
            &self.id,
            payload,
            next,
            clock.clone(),
        )?);

        if !self.access.can_append(&entry, self.identity.provider()) {
            return Err(LogError::PermissionDenied {
                identity: self.identity.id().to_string(),
            });
        }

        for parent in &entry.next {
            self.nexts_index.insert(*parent, entry.cid);
        }
        self.entry_index.insert(entry.cid, Arc::clone(&entry));
        self.heads_index.clear();
        self.heads_index.insert(entry.cid, Arc::clone(&entry));
        self.clock = clock;

        debug!(
            log_id = %self.id,
            cid = %entry.cid,
            time = entry.clock.time(),
            next = entry.next.len(),
            "appended entry"
        );
        Ok(entry)
    }

    /// Entries reachable from this log's heads that `other` lacks and that
    /// belong to `other`'s log, in breadth-first discovery order.
    ///
    /// Expansion stops at entries `other` already has.
    pub fn difference<T: BlockStore>(&self, other: &Log<T>) -> Vec<Arc<Entry>> {
        let mut queue: VecDeque<Cid> = self.heads_index.keys().copied().collect();
        let mut traversed: BTreeSet<Cid> = queue.iter().copied().collect();
        let mut result = Vec::new();

        while let Some(cid) = queue.pop_front() {
            if other.has(&cid) {
                continue;
            }
            let Some(entry) = self.entry_index.get(&cid) else {
                continue;
            };
            if entry.log_id != other.id {
                continue;
            }
            for next in &entry.next {
                if !other.has(next) && traversed.insert(*next) {
                    queue.push_back(*next);
                }
            }
            result.push(Arc::clone(entry));
        }
        result
    }

    /// Merge `other` into this log.
    ///
    /// Logs with different ids are left alone. Every new entry must pass
    /// the access controller and signature verification before anything is
    /// merged; the first failure aborts the join. An entry at time
    /// `u64::MAX` is refused with [`LogError::ClockOverflow`], since nothing
    /// could ever be appended after it. Merged entries are written to this
    /// log's block store in one batch.
    ///
    /// With `size`, only the newest `size` values are kept afterwards.
    /// Truncation discards history, so replicas joining with different
    /// sizes stop converging.
    pub fn join<T: BlockStore>(&mut self, other: &Log<T>, size: Option<usize>) -> Result<()> {
        if self.id != other.id {
            debug!(log_id = %self.id, other = %other.id, "skipping join with a different log");
            return Ok(());
        }

        let new_items = other.difference(self);

        let identity = Arc::clone(&self.identity);
        let provider = identity.provider();
        for entry in &new_items {
            if !self.access.can_append(entry, provider) {
                return Err(LogError::PermissionDenied {
                    identity: entry.identity.id.clone(),
                });
            }
        }
        for entry in &new_items {
            if entry.clock.time() == u64::MAX {
                return Err(LogError::ClockOverflow(u64::MAX));
            }
            if !Entry::verify(provider, entry) {
                return Err(LogError::InvalidSignature {
                    cid: entry.cid,
                    signature: hex::encode(&entry.signature),
                    public_key: entry.identity.public_key.clone(),
                });
            }
        }

        // Materialize merged entries locally so this replica can reload them.
        let blocks = new_items
            .iter()
            .map(|entry| entry.to_block())
            .collect::<Result<Vec<_>>>()?;
        let blocks: Vec<&[u8]> = blocks.iter().map(Vec::as_slice).collect();
        let cids = self
            .storage
            .put_batch(&blocks)
            .map_err(LogError::storage)?;
        for (entry, cid) in new_items.iter().zip(cids) {
            if cid != entry.cid {
                return Err(LogError::CidMismatch {
                    expected: entry.cid,
                    actual: cid,
                });
            }
        }

        let mut referenced = BTreeSet::new();
        for entry in &new_items {
            for parent in &entry.next {
                self.nexts_index.insert(*parent, entry.cid);
                referenced.insert(*parent);
            }
            self.entry_index
                .entry(entry.cid)
                .or_insert_with(|| Arc::clone(entry));
        }

        let candidates: BTreeSet<Cid> = self
            .heads_index
            .keys()
            .chain(other.heads_index.keys())
            .copied()
            .collect();
        let candidates: Vec<Arc<Entry>> = candidates
            .iter()
            .filter_map(|cid| self.entry_index.get(cid).cloned())
            .collect();
        self.heads_index = find_heads(&candidates)
            .into_iter()
            .filter(|e| !referenced.contains(&e.cid) && !self.nexts_index.contains_key(&e.cid))
            .map(|e| (e.cid, e))
            .collect();

        if let Some(size) = size {
            self.truncate(size);
        }

        self.clock.advance_to(max_clock_time(self.heads_index.values()));

        debug!(
            log_id = %self.id,
            merged = new_items.len(),
            len = self.len(),
            heads = self.heads_index.len(),
            "joined log"
        );
        Ok(())
    }

    /// Keep only the newest `size` values and rebuild every index.
    fn truncate(&mut self, size: usize) {
        let values = self.values();
        let kept = &values[values.len().saturating_sub(size)..];

        self.entry_index = kept.iter().map(|e| (e.cid, Arc::clone(e))).collect();
        self.nexts_index = index_nexts(kept);
        self.heads_index = find_heads(kept)
            .into_iter()
            .map(|e| (e.cid, e))
            .collect();
    }

    /// The log as `{ id, heads }`.
    pub fn to_json(&self) -> LogManifest {
        LogManifest {
            id: self.id.clone(),
            heads: self.heads().iter().map(|e| e.cid).collect(),
        }
    }

    /// The log as `{ id, heads, values }` with full entries.
    pub fn to_snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            id: self.id.clone(),
            heads: self.heads().iter().map(|e| Entry::clone(e)).collect(),
            values: self.values().iter().map(|e| Entry::clone(e)).collect(),
        }
    }

    /// The manifest as UTF-8 JSON bytes.
    pub fn to_buffer(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_json())?)
    }

    /// Write the manifest to the block store and return its cid.
    pub fn to_cid(&self) -> Result<Cid> {
        let block = Envelope::new(MANIFEST_VERSION, BlockKind::Manifest, self.to_buffer()?);
        let cid = self
            .storage
            .put(&block.to_bytes())
            .map_err(LogError::storage)?;
        debug!(log_id = %self.id, %cid, "stored manifest");
        Ok(cid)
    }

    /// Render the log newest first, one entry per line, each indented by
    /// the length of its descendant chain.
    ///
    /// ```text
    /// three
    /// └─two
    ///   └─one
    /// ```
    pub fn render<F>(&self, payload_mapper: F) -> String
    where
        F: Fn(&[u8]) -> String,
    {
        let values = self.values();
        values
            .iter()
            .rev()
            .map(|entry| {
                let depth = Entry::find_children(entry, &values).len();
                let mut line = "  ".repeat(depth.saturating_sub(1));
                if depth > 0 {
                    line.push_str("└─");
                }
                line.push_str(&payload_mapper(&entry.payload));
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<S: BlockStore> fmt::Display for Log<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(|payload| String::from_utf8_lossy(payload).into_owned()))
    }
}

impl<S: BlockStore> fmt::Debug for Log<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("heads", &self.heads_index.keys().collect::<Vec<_>>())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Entries not referenced by any other entry in `entries`, ordered by clock
/// id then cid.
pub fn find_heads(entries: &[Arc<Entry>]) -> Vec<Arc<Entry>> {
    let referenced: BTreeSet<Cid> = entries
        .iter()
        .flat_map(|e| e.next.iter().copied())
        .collect();

    let mut heads: Vec<Arc<Entry>> = entries
        .iter()
        .filter(|e| !referenced.contains(&e.cid))
        .cloned()
        .collect();
    heads.sort_by(|a, b| {
        a.clock
            .id()
            .cmp(b.clock.id())
            .then_with(|| a.cid.cmp(&b.cid))
    });
    heads.dedup_by_key(|e| e.cid);
    heads
}

/// Entries with no parents or with a parent outside `entries`, unique by
/// cid and ordered by [`Entry::compare`].
pub fn find_tails(entries: &[Arc<Entry>]) -> Vec<Arc<Entry>> {
    let cids: BTreeSet<Cid> = entries.iter().map(|e| e.cid).collect();

    let tails: BTreeMap<Cid, Arc<Entry>> = entries
        .iter()
        .filter(|e| e.next.is_empty() || e.next.iter().any(|n| !cids.contains(n)))
        .map(|e| (e.cid, Arc::clone(e)))
        .collect();

    let mut tails: Vec<_> = tails.into_values().collect();
    tails.sort_by(|a, b| Entry::compare(a, b));
    tails
}

/// Cids referenced by `entries` that are not themselves in `entries`.
pub fn find_tail_cids(entries: &[Arc<Entry>]) -> Vec<Cid> {
    let cids: BTreeSet<Cid> = entries.iter().map(|e| e.cid).collect();
    let mut seen = BTreeSet::new();
    entries
        .iter()
        .flat_map(|e| e.next.iter().copied())
        .filter(|n| !cids.contains(n) && seen.insert(*n))
        .collect()
}

fn index_nexts<'a>(entries: impl IntoIterator<Item = &'a Arc<Entry>>) -> BTreeMap<Cid, Cid> {
    let mut index = BTreeMap::new();
    for entry in entries {
        for parent in &entry.next {
            index.insert(*parent, entry.cid);
        }
    }
    index
}

fn max_clock_time<'a>(entries: impl IntoIterator<Item = &'a Arc<Entry>>) -> u64 {
    entries
        .into_iter()
        .map(|e| e.clock.time())
        .max()
        .unwrap_or(0)
}

fn random_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, WriteAccess};
    use crdt_log_store::MemoryStore;
    use ed25519_dalek::SigningKey;

    fn identity(seed: u8) -> Arc<Identity> {
        Arc::new(Identity::new(
            format!("writer-{seed}"),
            SigningKey::from_bytes(&[seed; 32]),
        ))
    }

    fn log_with(
        store: &Arc<MemoryStore>,
        seed: u8,
        access: Arc<dyn AccessController>,
    ) -> Log<MemoryStore> {
        Log::builder(Arc::clone(store), access, identity(seed))
            .log_id("X")
            .build()
            .unwrap()
    }

    fn new_log(store: &Arc<MemoryStore>, seed: u8) -> Log<MemoryStore> {
        log_with(store, seed, Arc::new(AllowAll))
    }

    fn payloads(entries: &[Arc<Entry>]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8_lossy(&e.payload).into_owned())
            .collect()
    }

    fn cids(entries: &[Arc<Entry>]) -> BTreeSet<Cid> {
        entries.iter().map(|e| e.cid).collect()
    }

    #[test]
    fn empty_log() {
        let store = Arc::new(MemoryStore::new());
        let log = new_log(&store, 1);

        assert!(log.is_empty());
        assert!(log.heads().is_empty());
        assert!(log.values().is_empty());
        assert_eq!(log.clock().time(), 0);
        assert_eq!(log.clock().id(), log.identity().public_key());
        assert_eq!(log.to_string(), "");
    }

    #[test]
    fn default_id_is_a_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let log = Log::builder(store, Arc::new(AllowAll), identity(1))
            .build()
            .unwrap();
        assert!(log.id().parse::<u128>().unwrap() > 0);
    }

    #[test]
    fn append_links_to_previous_head() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);

        let a = log.append("A").unwrap();
        let b = log.append("B").unwrap();
        let c = log.append("C").unwrap();

        assert!(a.next.is_empty());
        assert_eq!(b.next, vec![a.cid]);
        assert_eq!(c.next, vec![b.cid]);
        assert_eq!(
            [a.clock.time(), b.clock.time(), c.clock.time()],
            [1, 2, 3]
        );
        assert_eq!(c.log_id, "X");
        assert!(store.has(&c.cid).unwrap());
    }

    #[test]
    fn append_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);

        for i in 0..10 {
            let len = log.len();
            let time = log.clock().time();
            let entry = log.append(format!("entry-{i}")).unwrap();

            assert_eq!(log.len(), len + 1);
            assert_eq!(log.heads(), vec![entry.clone()]);
            assert!(log.clock().time() > time);
            assert_eq!(log.clock().time(), entry.clock.time());
        }
    }

    #[test]
    fn append_with_pointer_count() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);
        for i in 0..5 {
            log.append(format!("{i}")).unwrap();
        }
        let values = log.values();

        let entry = log.append_with("x", 4).unwrap();
        let expected: Vec<Cid> = values.iter().rev().take(4).map(|e| e.cid).collect();
        assert_eq!(entry.next, expected);
    }

    #[test]
    fn linear_scenario() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);
        let a = log.append("A").unwrap();
        let b = log.append("B").unwrap();
        let c = log.append("C").unwrap();

        assert_eq!(log.heads(), vec![c.clone()]);
        assert_eq!(log.values(), vec![a.clone(), b, c.clone()]);
        assert_eq!(log.tails(), vec![a]);
        assert!(log.tail_cids().is_empty());

        let d = log.append("x").unwrap();
        assert_eq!(log.heads(), vec![d.clone()]);
        assert!(d.next.contains(&c.cid));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn append_denied_leaves_log_untouched() {
        let store = Arc::new(MemoryStore::new());
        let mut log = log_with(&store, 1, Arc::new(WriteAccess::new(["someone-else"])));

        let err = log.append("nope").unwrap_err();
        assert!(matches!(
            err,
            LogError::PermissionDenied { ref identity } if identity == "writer-1"
        ));
        assert!(log.is_empty());
        assert!(log.heads().is_empty());
        assert_eq!(log.clock().time(), 0);
    }

    #[test]
    fn join_concurrent_branches() {
        let store = Arc::new(MemoryStore::new());
        let mut l1 = new_log(&store, 1);
        let mut l2 = new_log(&store, 2);

        let a = l1.append("A").unwrap();
        l2.join(&l1, None).unwrap();
        let b = l1.append("B").unwrap();
        let c = l2.append("C").unwrap();
        assert_eq!(b.clock.time(), c.clock.time());

        l1.join(&l2, None).unwrap();

        assert_eq!(l1.len(), 3);
        assert_eq!(cids(&l1.entries().cloned().collect::<Vec<_>>()), cids(&[a, b.clone(), c.clone()]));

        let mut expected = vec![b, c];
        expected.sort_by(|x, y| l1.sort_fn().compare(y, x));
        assert_eq!(l1.heads(), expected);
        assert_eq!(l1.clock().time(), 2);
    }

    #[test]
    fn join_is_commutative() {
        let store = Arc::new(MemoryStore::new());
        let mut x = new_log(&store, 1);
        let mut y = new_log(&store, 2);
        for i in 0..3 {
            x.append(format!("x{i}")).unwrap();
            y.append(format!("y{i}")).unwrap();
        }

        let mut xy = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(3))
            .log_id("X")
            .entries(x.values())
            .build()
            .unwrap();
        xy.join(&y, None).unwrap();
        y.join(&x, None).unwrap();

        assert_eq!(xy.len(), 6);
        assert_eq!(xy.values(), y.values());
        assert_eq!(cids(&xy.heads()), cids(&y.heads()));
    }

    #[test]
    fn join_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        a.append("one").unwrap();
        b.append("two").unwrap();
        a.join(&b, None).unwrap();

        let copy = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(1))
            .log_id("X")
            .entries(a.values())
            .build()
            .unwrap();

        let values = a.values();
        let heads = a.heads();
        let clock = a.clock().clone();

        a.join(&copy, None).unwrap();
        a.join(&b, None).unwrap();

        assert_eq!(a.values(), values);
        assert_eq!(a.heads(), heads);
        assert_eq!(a.len(), 2);
        assert_eq!(a.clock(), &clock);
    }

    #[test]
    fn join_advances_clock() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        let mine = a.append("a").unwrap();
        for i in 0..5 {
            b.append(format!("b{i}")).unwrap();
        }
        let theirs = b.heads()[0].clone();

        a.join(&b, None).unwrap();
        assert_eq!(a.clock().time(), 5);
        assert_eq!(a.clock().id(), a.identity().public_key());

        let next = a.append("after").unwrap();
        assert_eq!(next.clock.time(), 6);
        assert!(next.next.contains(&mine.cid));
        assert!(next.next.contains(&theirs.cid));
        assert_eq!(a.heads(), vec![next]);
    }

    #[test]
    fn join_denied_merges_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut a = log_with(&store, 1, Arc::new(WriteAccess::new(["writer-1"])));
        let mut b = new_log(&store, 2);
        a.append("mine").unwrap();
        b.append("theirs").unwrap();

        let err = a.join(&b, None).unwrap_err();
        assert!(matches!(
            err,
            LogError::PermissionDenied { ref identity } if identity == "writer-2"
        ));
        assert_eq!(a.len(), 1);
        assert_eq!(payloads(&a.heads()), vec!["mine"]);
    }

    #[test]
    fn join_rejects_bad_signature() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let writer = identity(2);

        let mut forged = Entry::create(
            store.as_ref(),
            &writer,
            "X",
            "forged",
            vec![],
            LamportClock::with_time(writer.public_key(), 1),
        )
        .unwrap();
        forged.signature[0] ^= 0xFF;
        let forged_cid = forged.cid;

        let b = Log::builder(Arc::clone(&store), Arc::new(AllowAll), writer)
            .log_id("X")
            .entries([forged])
            .build()
            .unwrap();

        let err = a.join(&b, None).unwrap_err();
        assert!(matches!(err, LogError::InvalidSignature { cid, .. } if cid == forged_cid));
        assert!(a.is_empty());
        assert_eq!(a.clock().time(), 0);
    }

    #[test]
    fn join_stores_merged_blocks() {
        let mine = Arc::new(MemoryStore::new());
        let theirs = Arc::new(MemoryStore::new());
        let mut a = new_log(&mine, 1);
        let mut b = new_log(&theirs, 2);
        let entry = b.append("remote").unwrap();
        assert!(!mine.has(&entry.cid).unwrap());

        a.join(&b, None).unwrap();
        assert!(mine.has(&entry.cid).unwrap());
        let stored = Entry::fetch(mine.as_ref(), &entry.cid).unwrap();
        assert_eq!(&stored, a.get(&entry.cid).unwrap().as_ref());
    }

    #[test]
    fn join_rejects_entry_with_wrong_cid() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        let genuine = b.append("genuine").unwrap();

        let mut relabeled = Entry::clone(&genuine);
        relabeled.cid = Cid::of(b"somewhere else");
        let c = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .log_id("X")
            .entries([relabeled])
            .build()
            .unwrap();

        let err = a.join(&c, None).unwrap_err();
        assert!(matches!(
            err,
            LogError::CidMismatch { actual, .. } if actual == genuine.cid
        ));
        assert!(a.is_empty());
    }

    fn entry_at_max_time(store: &MemoryStore, seed: u8) -> Entry {
        let writer = identity(seed);
        let clock = LamportClock::with_time(writer.public_key(), u64::MAX);
        Entry::create(store, &writer, "X", "last", vec![], clock).unwrap()
    }

    #[test]
    fn join_refuses_entry_at_max_time() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let b = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .log_id("X")
            .entries([entry_at_max_time(&store, 2)])
            .build()
            .unwrap();

        let err = a.join(&b, None).unwrap_err();
        assert!(matches!(err, LogError::ClockOverflow(u64::MAX)));
        assert!(a.is_empty());
        assert_eq!(a.clock().time(), 0);

        let next = a.append("local").unwrap();
        assert_eq!(next.clock.time(), 1);
    }

    #[test]
    fn append_after_max_time_fails_without_changes() {
        let store = Arc::new(MemoryStore::new());
        let last = Arc::new(entry_at_max_time(&store, 2));
        let mut log = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(1))
            .log_id("X")
            .entries([Arc::clone(&last)])
            .build()
            .unwrap();
        assert_eq!(log.clock().time(), u64::MAX);

        let err = log.append("one more").unwrap_err();
        assert!(matches!(err, LogError::ClockOverflow(u64::MAX)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.heads(), vec![last]);
        assert_eq!(log.clock().time(), u64::MAX);
    }

    /// Serves reads from memory and refuses every write.
    struct ReadOnlyStore(MemoryStore);

    impl BlockStore for ReadOnlyStore {
        type Error = String;

        fn put(&self, _bytes: &[u8]) -> std::result::Result<Cid, String> {
            Err("read-only".into())
        }

        fn get(&self, cid: &Cid) -> std::result::Result<Option<Vec<u8>>, String> {
            self.0.get(cid).map_err(|e| e.to_string())
        }

        fn remove(&self, _cid: &Cid) -> std::result::Result<bool, String> {
            Err("read-only".into())
        }

        fn cids(&self) -> std::result::Result<Vec<Cid>, String> {
            self.0.cids().map_err(|e| e.to_string())
        }

        fn put_batch(&self, _blocks: &[&[u8]]) -> std::result::Result<Vec<Cid>, String> {
            Err("read-only".into())
        }
    }

    #[test]
    fn join_is_untouched_when_block_write_fails() {
        let mut a = Log::builder(
            Arc::new(ReadOnlyStore(MemoryStore::new())),
            Arc::new(AllowAll),
            identity(1),
        )
        .log_id("X")
        .build()
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut b = new_log(&store, 2);
        b.append("one").unwrap();
        b.append("two").unwrap();

        let err = a.join(&b, None).unwrap_err();
        assert!(matches!(err, LogError::Storage(ref msg) if msg == "read-only"));
        assert!(a.is_empty());
        assert!(a.heads().is_empty());
        assert_eq!(a.clock().time(), 0);
    }

    #[test]
    fn join_with_different_log_id_is_a_silent_no_op() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut other = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .log_id("Y")
            .build()
            .unwrap();
        a.append("a").unwrap();
        other.append("b").unwrap();

        // Cross-log joins are ignored, not rejected: the caller gets Ok and
        // no signal that nothing was merged.
        a.join(&other, None).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(payloads(&a.values()), vec!["a"]);
    }

    #[test]
    fn difference_skips_shared_history() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        a.append("shared").unwrap();
        b.join(&a, None).unwrap();
        let one = a.append("one").unwrap();
        let two = a.append("two").unwrap();

        assert_eq!(a.difference(&b), vec![two, one]);
        assert!(b.difference(&a).is_empty());
    }

    #[test]
    fn join_with_size_truncates() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        for i in 0..5 {
            b.append(format!("{i}")).unwrap();
        }
        let all = b.values();

        a.join(&b, Some(3)).unwrap();

        assert_eq!(a.len(), 3);
        assert_eq!(payloads(&a.values()), vec!["2", "3", "4"]);
        assert_eq!(a.heads(), vec![all[4].clone()]);
        assert_eq!(a.tails(), vec![all[2].clone()]);
        assert_eq!(a.tail_cids(), vec![all[1].cid]);
        assert!(!a.has(&all[0].cid));
        assert_eq!(a.clock().time(), 5);
    }

    #[test]
    fn traversal_is_deterministic() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        let mut c = new_log(&store, 3);
        for i in 0..3 {
            a.append(format!("a{i}")).unwrap();
            b.append(format!("b{i}")).unwrap();
            c.append(format!("c{i}")).unwrap();
        }

        let mut forward = new_log(&store, 4);
        forward.join(&a, None).unwrap();
        forward.join(&b, None).unwrap();
        forward.join(&c, None).unwrap();

        let mut backward = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(5))
            .log_id("X")
            .entries(forward.values().into_iter().rev())
            .build()
            .unwrap();
        assert_eq!(forward.values(), backward.values());

        let roots = forward.heads();
        let first = forward.traverse(&roots, Some(4));
        assert_eq!(first.len(), 4);
        assert_eq!(first, backward.traverse(&roots, Some(4)));
        assert!(first.iter().all(|e| e.clock.time() >= 2));

        backward.join(&forward, None).unwrap();
        assert_eq!(backward.len(), 9);
    }

    #[test]
    fn every_entry_reachable_from_heads() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        a.append("a0").unwrap();
        b.append("b0").unwrap();
        a.join(&b, None).unwrap();
        a.append("a1").unwrap();
        b.append("b1").unwrap();
        a.join(&b, None).unwrap();

        let reachable = cids(&a.traverse(&a.heads(), None));
        let all: BTreeSet<Cid> = a.entries().map(|e| e.cid).collect();
        assert_eq!(reachable, all);

        for tail in a.tails() {
            assert!(tail.next.is_empty() || tail.next.iter().any(|n| !a.has(n)));
        }
    }

    #[test]
    fn find_heads_orders_by_clock_id() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        let x = a.append("x").unwrap();
        let y = b.append("y").unwrap();

        let heads = find_heads(&[y.clone(), x.clone(), x.clone()]);
        let mut expected = vec![x, y];
        expected.sort_by(|p, q| p.clock.id().cmp(q.clock.id()));
        assert_eq!(heads, expected);
    }

    #[test]
    fn build_rejects_foreign_heads() {
        let store = Arc::new(MemoryStore::new());
        let mut other = new_log(&store, 1);
        let stray = other.append("stray").unwrap();

        let err = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .heads([stray.clone()])
            .build()
            .unwrap_err();
        assert!(matches!(err, LogError::HeadNotInEntries(cid) if cid == stray.cid));
    }

    #[test]
    fn build_takes_clock_from_heads_or_argument() {
        let store = Arc::new(MemoryStore::new());
        let mut source = new_log(&store, 1);
        source.append("one").unwrap();
        source.append("two").unwrap();

        let rebuilt = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .log_id("X")
            .entries(source.values())
            .build()
            .unwrap();
        assert_eq!(rebuilt.clock().time(), 2);
        assert_eq!(rebuilt.clock().id(), identity(2).public_key());

        let ahead = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(2))
            .log_id("X")
            .entries(source.values())
            .clock(LamportClock::with_time("ignored", 10))
            .build()
            .unwrap();
        assert_eq!(ahead.clock().time(), 10);
    }

    #[test]
    fn custom_sort_changes_value_order() {
        let store = Arc::new(MemoryStore::new());
        let mut a = new_log(&store, 1);
        let mut b = new_log(&store, 2);
        a.append("zzz").unwrap();
        b.append("aaa").unwrap();

        let mut log = Log::builder(Arc::clone(&store), Arc::new(AllowAll), identity(3))
            .log_id("X")
            .sort_fn(SortFn::custom(|x, y| x.payload.cmp(&y.payload)))
            .build()
            .unwrap();
        log.join(&a, None).unwrap();
        log.join(&b, None).unwrap();

        assert_eq!(payloads(&log.values()), vec!["aaa", "zzz"]);
        assert_eq!(payloads(&log.heads()), vec!["zzz", "aaa"]);
    }

    #[test]
    fn serialized_forms() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);
        log.append("one").unwrap();
        let two = log.append("two").unwrap();

        let manifest = log.to_json();
        assert_eq!(manifest.id, "X");
        assert_eq!(manifest.heads, vec![two.cid]);

        let buffer = log.to_buffer().unwrap();
        let parsed: LogManifest = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            format!(r#"{{"id":"X","heads":["{}"]}}"#, two.cid)
        );

        let snapshot = log.to_snapshot();
        assert_eq!(snapshot.heads, vec![Entry::clone(&two)]);
        assert_eq!(snapshot.values.len(), 2);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: LogSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn to_cid_stores_manifest_block() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);
        log.append("one").unwrap();

        let cid = log.to_cid().unwrap();
        let bytes = store.get(&cid).unwrap().unwrap();
        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.kind, BlockKind::Manifest);
        assert_eq!(envelope.payload, log.to_buffer().unwrap());
    }

    #[test]
    fn renders_descendant_chains() {
        let store = Arc::new(MemoryStore::new());
        let mut log = new_log(&store, 1);
        log.append("one").unwrap();
        log.append("two").unwrap();
        log.append("three").unwrap();

        assert_eq!(log.to_string(), "three\n└─two\n  └─one");
        assert_eq!(
            log.render(|p| String::from_utf8_lossy(p).to_uppercase()),
            "THREE\n└─TWO\n  └─ONE"
        );
    }

    #[test]
    fn log_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Log<MemoryStore>>();
    }
}
