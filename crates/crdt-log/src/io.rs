//! Loading logs from a block store.
//!
//! Every loader walks the DAG from a set of starting points, newest entry
//! first: a max-heap ordered by [`Entry::compare`] holds the fetched but not
//! yet accepted entries. A child's clock is always ahead of its parents', so
//! stopping after `length` entries keeps exactly the newest `length`
//! reachable entries.
//!
//! Starting blocks that cannot be found are errors; missing ancestors are
//! skipped and stay visible through [`Log::tail_cids`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crdt_log_store::{BlockStore, Cid};
use tracing::{debug, warn};

use crate::access::AccessController;
use crate::entry::Entry;
use crate::envelope::{BlockKind, Envelope};
use crate::error::LogError;
use crate::identity::Identity;
use crate::log::{Log, LogManifest, LogSnapshot};
use crate::sorting::SortFn;

type Result<T> = std::result::Result<T, LogError>;

type ProgressFn<'a> = dyn FnMut(&Entry, Option<&Entry>, usize) + 'a;

/// Options for loading a log.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use crdt_log::io::LoadOptions;
///
/// let mut loaded = 0;
/// let options = LoadOptions::new()
///     .length(100)
///     .timeout(Duration::from_secs(5))
///     .on_progress(|_entry, _parent, _depth| loaded += 1);
/// # drop(options);
/// ```
#[derive(Default)]
pub struct LoadOptions<'a> {
    length: Option<usize>,
    exclude: BTreeSet<Cid>,
    timeout: Option<Duration>,
    sort: Option<SortFn>,
    on_progress: Option<Box<ProgressFn<'a>>>,
}

impl<'a> LoadOptions<'a> {
    /// Load everything reachable, with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most the newest `length` entries.
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Neither fetch nor include these entries, nor walk past them.
    pub fn exclude<I: IntoIterator<Item = Cid>>(mut self, cids: I) -> Self {
        self.exclude.extend(cids);
        self
    }

    /// Stop fetching once `timeout` has elapsed and return what was loaded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sort policy of the loaded log.
    pub fn sort_fn(mut self, sort: SortFn) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Called for every accepted entry with the entry that led to it
    /// (`None` for starting points) and its distance from a starting point.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Entry, Option<&Entry>, usize) + 'a,
    {
        self.on_progress = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for LoadOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("length", &self.length)
            .field("exclude", &self.exclude.len())
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish_non_exhaustive()
    }
}

struct Pending {
    entry: Arc<Entry>,
    parent: Option<Arc<Entry>>,
    depth: usize,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.entry.cid == other.entry.cid
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        Entry::compare(&self.entry, &other.entry)
    }
}

struct Loader<'s, 'o, 'a, S: ?Sized> {
    store: &'s S,
    options: &'o mut LoadOptions<'a>,
    deadline: Option<Instant>,
    timed_out: bool,
    seen: BTreeSet<Cid>,
    frontier: BinaryHeap<Pending>,
}

impl<'s, 'o, 'a, S: BlockStore + ?Sized> Loader<'s, 'o, 'a, S> {
    fn new(store: &'s S, options: &'o mut LoadOptions<'a>) -> Self {
        Self {
            store,
            deadline: options.timeout.map(|t| Instant::now() + t),
            timed_out: false,
            seen: options.exclude.clone(),
            frontier: BinaryHeap::new(),
            options,
        }
    }

    /// Fetch a block, or `None` if it is missing or the deadline passed.
    fn fetch(&mut self, cid: &Cid) -> Result<Option<Entry>> {
        if self.timed_out {
            return Ok(None);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.timed_out = true;
            warn!(%cid, "load deadline reached, returning partial log");
            return Ok(None);
        }
        match Entry::fetch(self.store, cid) {
            Ok(entry) => Ok(Some(entry)),
            Err(LogError::EntryNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn add_root(&mut self, cid: &Cid) -> Result<()> {
        if !self.seen.insert(*cid) {
            return Ok(());
        }
        match self.fetch(cid)? {
            Some(entry) => {
                self.frontier.push(Pending {
                    entry: Arc::new(entry),
                    parent: None,
                    depth: 0,
                });
                Ok(())
            }
            None if self.timed_out => Ok(()),
            None => Err(LogError::EntryNotFound(*cid)),
        }
    }

    fn add_entry(&mut self, entry: Arc<Entry>) {
        if self.seen.insert(entry.cid) {
            self.frontier.push(Pending {
                entry,
                parent: None,
                depth: 0,
            });
        }
    }

    /// Accept entries newest first until the frontier is exhausted or the
    /// length bound is reached.
    fn run(mut self) -> Result<Vec<Arc<Entry>>> {
        let limit = self.options.length.unwrap_or(usize::MAX);
        let mut loaded = Vec::new();

        while loaded.len() < limit {
            let Some(Pending {
                entry,
                parent,
                depth,
            }) = self.frontier.pop()
            else {
                break;
            };

            if let Some(progress) = self.options.on_progress.as_mut() {
                progress(entry.as_ref(), parent.as_deref(), depth);
            }

            for next in &entry.next {
                if !self.seen.insert(*next) {
                    continue;
                }
                match self.fetch(next)? {
                    Some(found) => self.frontier.push(Pending {
                        entry: Arc::new(found),
                        parent: Some(Arc::clone(&entry)),
                        depth: depth + 1,
                    }),
                    None if self.timed_out => {}
                    None => warn!(cid = %next, child = %entry.cid, "skipping missing ancestor"),
                }
            }
            loaded.push(entry);
        }

        debug!(loaded = loaded.len(), timed_out = self.timed_out, "fetched entries");
        Ok(loaded)
    }
}

/// Fetch the entries reachable from `roots`, newest first.
///
/// Fails with [`LogError::EntryNotFound`] if a root is missing.
pub fn fetch_all<S: BlockStore + ?Sized>(
    store: &S,
    roots: &[Cid],
    options: &mut LoadOptions<'_>,
) -> Result<Vec<Arc<Entry>>> {
    let mut loader = Loader::new(store, options);
    for root in roots {
        loader.add_root(root)?;
    }
    loader.run()
}

/// Starting from already materialized `entries`, fetch their ancestors.
/// Returns the given entries together with the ancestors, newest first.
pub fn fetch_from_entries<S: BlockStore + ?Sized>(
    store: &S,
    entries: &[Arc<Entry>],
    options: &mut LoadOptions<'_>,
) -> Result<Vec<Arc<Entry>>> {
    let mut loader = Loader::new(store, options);
    for entry in entries {
        loader.add_entry(Arc::clone(entry));
    }
    loader.run()
}

/// Read a manifest block written by [`Log::to_cid`].
pub fn read_manifest<S: BlockStore + ?Sized>(store: &S, cid: &Cid) -> Result<LogManifest> {
    let bytes = store
        .get(cid)
        .map_err(LogError::storage)?
        .ok_or(LogError::EntryNotFound(*cid))?;

    let actual = Cid::of(&bytes);
    if actual != *cid {
        return Err(LogError::CidMismatch {
            expected: *cid,
            actual,
        });
    }

    let kind = Envelope::peek_kind(&bytes)?;
    if kind != BlockKind::Manifest {
        return Err(LogError::UnexpectedBlock { cid: *cid, kind });
    }
    let envelope = Envelope::from_bytes(&bytes)?;
    Ok(serde_json::from_slice(&envelope.payload)?)
}

impl<S: BlockStore> Log<S> {
    /// Load the log whose manifest is stored under `cid`.
    pub fn from_cid(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        cid: &Cid,
        options: LoadOptions<'_>,
    ) -> Result<Self> {
        let manifest = read_manifest(storage.as_ref(), cid)?;
        Self::from_json(storage, access, identity, &manifest, options)
    }

    /// Load a log from its manifest.
    pub fn from_json(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        manifest: &LogManifest,
        mut options: LoadOptions<'_>,
    ) -> Result<Self> {
        let entries = fetch_all(storage.as_ref(), &manifest.heads, &mut options)?;
        debug!(log_id = %manifest.id, len = entries.len(), "loaded log from manifest");
        Self::assemble(storage, access, identity, manifest.id.clone(), entries, options)
    }

    /// Load the log ending at the entry `cid`.
    pub fn from_entry_cid(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        cid: &Cid,
        log_id: impl Into<String>,
        mut options: LoadOptions<'_>,
    ) -> Result<Self> {
        let entries = fetch_all(storage.as_ref(), std::slice::from_ref(cid), &mut options)?;
        Self::assemble(storage, access, identity, log_id.into(), entries, options)
    }

    /// Load a log from materialized entries and their stored ancestors.
    ///
    /// The log id is taken from the last of `entries`.
    pub fn from_entries(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        entries: &[Arc<Entry>],
        mut options: LoadOptions<'_>,
    ) -> Result<Self> {
        let log_id = entries.last().map(|e| e.log_id.clone());
        let loaded = fetch_from_entries(storage.as_ref(), entries, &mut options)?;

        let mut builder = Log::builder(storage, access, identity).entries(loaded);
        if let Some(id) = log_id {
            builder = builder.log_id(id);
        }
        if let Some(sort) = options.sort {
            builder = builder.sort_fn(sort);
        }
        builder.build()
    }

    /// Rebuild a log from a snapshot without touching the block store.
    ///
    /// Every entry's cid is checked against its encoding. The length bound
    /// and exclude set apply; the deadline does not.
    pub fn from_snapshot(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        snapshot: &LogSnapshot,
        options: LoadOptions<'_>,
    ) -> Result<Self> {
        for entry in snapshot.values.iter().chain(&snapshot.heads) {
            entry.verify_cid()?;
        }

        let sort = options.sort.unwrap_or_default();
        let mut values: Vec<Arc<Entry>> = snapshot
            .values
            .iter()
            .filter(|e| !options.exclude.contains(&e.cid))
            .cloned()
            .map(Arc::new)
            .collect();

        let mut builder = Log::builder(storage, access, identity).log_id(snapshot.id.clone());
        match options.length {
            Some(length) if length < values.len() => {
                values.sort_by(|a, b| sort.compare(b, a));
                values.truncate(length);
            }
            _ if options.exclude.is_empty() => {
                let heads: Vec<Entry> = snapshot.heads.clone();
                builder = builder.heads(heads);
            }
            _ => {}
        }

        builder.entries(values).sort_fn(sort).build()
    }

    fn assemble(
        storage: Arc<S>,
        access: Arc<dyn AccessController>,
        identity: Arc<Identity>,
        log_id: String,
        entries: Vec<Arc<Entry>>,
        options: LoadOptions<'_>,
    ) -> Result<Self> {
        let mut builder = Log::builder(storage, access, identity)
            .log_id(log_id)
            .entries(entries);
        if let Some(sort) = options.sort {
            builder = builder.sort_fn(sort);
        }
        builder.build()
    }
}
