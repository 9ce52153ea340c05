//! Append-only multi-writer log collaborator.
//!
//! The log is the single source of truth. Every write appends an immutable [`Entry`] to the
//! local writer's feed; reading a key yields its *heads*, the revisions not in the causal past
//! of any other revision of the same key. Concurrent writers therefore fork a key instead of
//! overwriting each other.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::clock::CausalClock;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::ids::{Id, Seq, WriterKey};
use crate::version::Version;

/// One appended record.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Element,
    pub writer: WriterKey,
    pub seq: Seq,
    pub clock: CausalClock,
}

impl Entry {
    pub fn version(&self) -> Version {
        Version::new(self.writer, self.seq)
    }

    pub fn id(&self) -> Id {
        Id::from_log_key(&self.key)
    }

    /// Whether `other` lies in this entry's causal past.
    pub fn supersedes(&self, other: &Entry) -> bool {
        (self.writer, self.seq) != (other.writer, other.seq)
            && self.clock.covers(&other.writer, other.seq)
    }
}

/// Read access to the log, either live or as of a causal snapshot.
#[async_trait]
pub trait LogView: Send + Sync {
    /// All current heads for `key`; more than one when writers forked it.
    async fn get(&self, key: &str) -> Result<Vec<Entry>>;
}

#[async_trait]
pub trait Log: LogView {
    /// Writer that local appends go to.
    fn local_writer(&self) -> WriterKey;

    /// Every known writer feed, in a stable order for the life of the process.
    fn writers(&self) -> Result<Vec<WriterKey>>;

    async fn put(&self, key: &str, value: Element) -> Result<Entry>;

    /// Append several entries atomically; either all become visible or none.
    async fn batch(&self, ops: Vec<(String, Element)>) -> Result<Vec<Entry>>;

    /// Exact entry lookup by writer and sequence number.
    async fn entry(&self, writer: &WriterKey, seq: Seq) -> Result<Option<Entry>>;

    /// Number of entries in the global append order.
    fn position(&self) -> Result<u64>;

    /// Up to `limit` entries in global append order, starting at position `from`.
    async fn entries(&self, from: u64, limit: usize) -> Result<Vec<Entry>>;

    /// Read-only view of the log as of `clock`.
    async fn checkout(&self, clock: &CausalClock) -> Result<Box<dyn LogView>>;

    /// Receives the new [`Log::position`] after every append.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// The revisions of `entry.key` that `entry` superseded when it was written.
///
/// Rewinds the writer's own feed by one in the entry's clock, checks the log out at that point,
/// and re-reads the key.
pub async fn previous_revisions<L: Log + ?Sized>(log: &L, entry: &Entry) -> Result<Vec<Entry>> {
    let mut clock = entry.clock.clone();
    if !clock.rewind(&entry.writer) || clock.is_genesis() {
        return Ok(Vec::new());
    }
    let view = log.checkout(&clock).await?;
    view.get(&entry.key).await
}

/// Heads among `candidates`: entries no other candidate has seen.
pub fn heads_of(candidates: Vec<Entry>) -> Vec<Entry> {
    candidates
        .iter()
        .filter(|e| !candidates.iter().any(|other| other.supersedes(e)))
        .cloned()
        .collect()
}

#[derive(Default)]
struct Feed {
    entries: Vec<Entry>,
}

#[derive(Default)]
struct LogState {
    feeds: Vec<(WriterKey, Feed)>,
    feed_index: HashMap<WriterKey, usize>,
    order: Vec<(usize, Seq)>,
    by_key: HashMap<String, Vec<(usize, Seq)>>,
}

impl LogState {
    fn feed_mut(&mut self, writer: WriterKey) -> usize {
        if let Some(&idx) = self.feed_index.get(&writer) {
            return idx;
        }
        let idx = self.feeds.len();
        self.feeds.push((writer, Feed::default()));
        self.feed_index.insert(writer, idx);
        idx
    }

    fn lookup(&self, writer: &WriterKey, seq: Seq) -> Option<&Entry> {
        let idx = *self.feed_index.get(writer)?;
        self.feeds[idx].1.entries.get(usize::try_from(seq).ok()?)
    }

    fn current_clock(&self) -> CausalClock {
        let mut clock = CausalClock::new();
        for (writer, feed) in &self.feeds {
            clock.set(*writer, feed.entries.len() as u64);
        }
        clock
    }

    fn revisions(&self, key: &str, view: Option<&CausalClock>) -> Vec<Entry> {
        let Some(locations) = self.by_key.get(key) else {
            return Vec::new();
        };
        locations
            .iter()
            .filter_map(|&(feed, seq)| self.feeds[feed].1.entries.get(seq as usize))
            .filter(|e| view.map_or(true, |clock| clock.covers(&e.writer, e.seq)))
            .cloned()
            .collect()
    }

    fn append(&mut self, entry: Entry) -> Result<()> {
        let feed = self.feed_mut(entry.writer);
        let entries = &mut self.feeds[feed].1.entries;
        if entry.seq != entries.len() as u64 {
            return Err(Error::Storage(format!(
                "feed {} expected seq {}, got {}",
                entry.writer,
                entries.len(),
                entry.seq
            )));
        }
        self.order.push((feed, entry.seq));
        self.by_key
            .entry(entry.key.clone())
            .or_default()
            .push((feed, entry.seq));
        entries.push(entry);
        Ok(())
    }
}

/// In-process multi-feed log.
///
/// Holds every feed this replica knows about; local writes go to `writer`, entries from other
/// replicas arrive through [`replicate`].
pub struct MemoryLog {
    writer: WriterKey,
    state: Arc<RwLock<LogState>>,
    notify: watch::Sender<u64>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_writer(WriterKey::random())
    }

    pub fn with_writer(writer: WriterKey) -> Self {
        let (notify, _) = watch::channel(0);
        let mut state = LogState::default();
        state.feed_mut(writer);
        Self {
            writer,
            state: Arc::new(RwLock::new(state)),
            notify,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LogState>> {
        self.state
            .read()
            .map_err(|_| Error::Storage("log lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LogState>> {
        self.state
            .write()
            .map_err(|_| Error::Storage("log lock poisoned".into()))
    }

    fn append_local(&self, ops: Vec<(String, Element)>) -> Result<Vec<Entry>> {
        let mut state = self.write()?;
        let feed = state.feed_mut(self.writer);
        let mut clock = state.current_clock();
        let mut next = state.feeds[feed].1.entries.len() as u64;
        let mut out = Vec::with_capacity(ops.len());
        for (key, value) in ops {
            clock.set(self.writer, next + 1);
            let entry = Entry {
                key,
                value,
                writer: self.writer,
                seq: next,
                clock: clock.clone(),
            };
            state.append(entry.clone())?;
            out.push(entry);
            next += 1;
        }
        let position = state.order.len() as u64;
        drop(state);
        self.notify.send_replace(position);
        Ok(out)
    }

    fn ingest(&self, incoming: Vec<Entry>) -> Result<usize> {
        let mut state = self.write()?;
        let mut added = 0;
        for entry in incoming {
            if state.lookup(&entry.writer, entry.seq).is_some() {
                continue;
            }
            state.append(entry)?;
            added += 1;
        }
        let position = state.order.len() as u64;
        drop(state);
        if added > 0 {
            self.notify.send_replace(position);
        }
        Ok(added)
    }

    fn snapshot_order(&self) -> Result<Vec<Entry>> {
        let state = self.read()?;
        Ok(state
            .order
            .iter()
            .map(|&(feed, seq)| state.feeds[feed].1.entries[seq as usize].clone())
            .collect())
    }
}

/// Exchange all missing entries between two replicas, in causal order, both directions.
///
/// Returns how many entries each side received, `(into_a, into_b)`.
pub fn replicate(a: &MemoryLog, b: &MemoryLog) -> Result<(usize, usize)> {
    let from_a = a.snapshot_order()?;
    let from_b = b.snapshot_order()?;
    let into_b = b.ingest(from_a)?;
    let into_a = a.ingest(from_b)?;
    tracing::debug!(into_a, into_b, "replicated");
    Ok((into_a, into_b))
}

struct MemoryLogView {
    state: Arc<RwLock<LogState>>,
    clock: CausalClock,
}

#[async_trait]
impl LogView for MemoryLogView {
    async fn get(&self, key: &str) -> Result<Vec<Entry>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Storage("log lock poisoned".into()))?;
        Ok(heads_of(state.revisions(key, Some(&self.clock))))
    }
}

#[async_trait]
impl LogView for MemoryLog {
    async fn get(&self, key: &str) -> Result<Vec<Entry>> {
        let state = self.read()?;
        Ok(heads_of(state.revisions(key, None)))
    }
}

#[async_trait]
impl Log for MemoryLog {
    fn local_writer(&self) -> WriterKey {
        self.writer
    }

    fn writers(&self) -> Result<Vec<WriterKey>> {
        Ok(self.read()?.feeds.iter().map(|(w, _)| *w).collect())
    }

    async fn put(&self, key: &str, value: Element) -> Result<Entry> {
        let mut entries = self.append_local(vec![(key.to_string(), value)])?;
        entries
            .pop()
            .ok_or_else(|| Error::Storage("append produced no entry".into()))
    }

    async fn batch(&self, ops: Vec<(String, Element)>) -> Result<Vec<Entry>> {
        self.append_local(ops)
    }

    async fn entry(&self, writer: &WriterKey, seq: Seq) -> Result<Option<Entry>> {
        Ok(self.read()?.lookup(writer, seq).cloned())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.read()?.order.len() as u64)
    }

    async fn entries(&self, from: u64, limit: usize) -> Result<Vec<Entry>> {
        let state = self.read()?;
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        Ok(state
            .order
            .iter()
            .skip(start)
            .take(limit)
            .map(|&(feed, seq)| state.feeds[feed].1.entries[seq as usize].clone())
            .collect())
    }

    async fn checkout(&self, clock: &CausalClock) -> Result<Box<dyn LogView>> {
        Ok(Box::new(MemoryLogView {
            state: Arc::clone(&self.state),
            clock: clock.clone(),
        }))
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}
