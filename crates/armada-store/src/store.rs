//! CoordStore — redb-backed hierarchical coordination store.
//!
//! Nodes live at absolute `/`-separated paths and carry a version that
//! increments on every write, which gives callers compare-and-set. Parents
//! are implicit: a node may exist without its ancestors. Every call runs in
//! one redb transaction, and a store-wide write lock serialises commit and
//! notification so watchers see changes in commit order.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::session::Session;
use crate::tables::*;
use crate::types::*;
use crate::watch::Watcher;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Events a watcher may fall behind by before it reports a lag.
pub const EVENT_CAPACITY: usize = 1024;

/// Thread-safe coordination store. Clones share one database.
#[derive(Clone)]
pub struct CoordStore {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    db: Database,
    write_lock: Mutex<()>,
    events: broadcast::Sender<WatchEvent>,
    sessions: Mutex<HashSet<SessionId>>,
    next_session: AtomicU64,
}

impl CoordStore {
    /// Open (or create) a persistent store at the given path.
    ///
    /// Ephemeral nodes left behind by a previous process are purged: their
    /// sessions cannot outlive it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        let purged = store.purge_ephemeral(|_| true)?;
        debug!(?path, purged, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and standalone mode).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn with_database(db: Database) -> StoreResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            inner: Arc::new(Inner {
                db,
                write_lock: Mutex::new(()),
                events,
                sessions: Mutex::new(HashSet::new()),
                next_session: AtomicU64::new(1),
            }),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODE_DATA).map_err(map_err!(Table))?;
        txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Read a node's data and metadata.
    pub fn get(&self, path: &str) -> StoreResult<Option<(Vec<u8>, Stat)>> {
        validate_path(path)?;
        let txn = self.inner.db.begin_read().map_err(map_err!(Transaction))?;
        let data = txn.open_table(NODE_DATA).map_err(map_err!(Table))?;
        let stats = txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
        let Some(stat) = read_stat(&stats, path)? else {
            return Ok(None);
        };
        let bytes = match data.get(path).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_vec(),
            None => Vec::new(),
        };
        Ok(Some((bytes, stat)))
    }

    /// Metadata of a node, if it exists.
    pub fn exists(&self, path: &str) -> StoreResult<Option<Stat>> {
        validate_path(path)?;
        let txn = self.inner.db.begin_read().map_err(map_err!(Transaction))?;
        let stats = txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
        read_stat(&stats, path)
    }

    /// Distinct next path segments beneath `path`, whether or not a node
    /// exists at the child path itself.
    pub fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        let prefix = child_prefix(path)?;
        let txn = self.inner.db.begin_read().map_err(map_err!(Transaction))?;
        let stats = txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
        let mut names = BTreeSet::new();
        for entry in stats
            .range::<&str>(prefix.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let Some(rest) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if let Some(segment) = rest.split('/').next() {
                names.insert(segment.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Nodes exactly one level beneath `path`, read in one transaction.
    /// Returns `(child name, data, stat)` in path order.
    pub fn list(&self, path: &str) -> StoreResult<Vec<(String, Vec<u8>, Stat)>> {
        let prefix = child_prefix(path)?;
        let txn = self.inner.db.begin_read().map_err(map_err!(Transaction))?;
        let data = txn.open_table(NODE_DATA).map_err(map_err!(Table))?;
        let stats = txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in data
            .range::<&str>(prefix.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let Some(rest) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if rest.contains('/') {
                continue;
            }
            if let Some(stat) = read_stat(&stats, key.value())? {
                results.push((rest.to_string(), value.value().to_vec(), stat));
            }
        }
        Ok(results)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Apply all ops atomically, or none of them.
    ///
    /// Ops see the effects of earlier ops in the same call. On failure the
    /// error is [`StoreError::TransactionFailed`] naming the first failing op.
    /// On success returns the resulting stat per op (`None` for deletes).
    pub fn transaction(&self, ops: Vec<Op>) -> StoreResult<Vec<Option<Stat>>> {
        for (index, op) in ops.iter().enumerate() {
            validate_path(op.path()).map_err(|source| StoreError::TransactionFailed {
                index,
                source: Box::new(source),
            })?;
        }

        let _guard = self.inner.write_lock.lock();
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        let count = ops.len();
        let applied = {
            let live = self.inner.sessions.lock();
            apply_all(&txn, ops, &live)
        };
        let (stats, events) = match applied {
            Ok(result) => result,
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                return Err(e);
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(ops = count, "transaction committed");
        self.publish(events);
        Ok(stats)
    }

    /// Create a persistent node. Fails with `NodeExists`.
    pub fn create(&self, path: &str, data: Vec<u8>) -> StoreResult<Stat> {
        self.single(Op::create(path, data))?
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    /// Overwrite a node's data, optionally only at `expected_version`.
    pub fn set(&self, path: &str, data: Vec<u8>, expected_version: Option<u64>) -> StoreResult<Stat> {
        let op = Op::Set {
            path: path.to_string(),
            data,
            version: expected_version,
        };
        self.single(op)?
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    /// Delete a node. Fails with `NotEmpty` while it has descendants.
    pub fn delete(&self, path: &str, expected_version: Option<u64>) -> StoreResult<()> {
        self.single(Op::delete(path, expected_version))?;
        Ok(())
    }

    fn single(&self, op: Op) -> StoreResult<Option<Stat>> {
        let stats = self.transaction(vec![op]).map_err(unwrap_single)?;
        Ok(stats.into_iter().next().flatten())
    }

    // ── Typed JSON helpers ─────────────────────────────────────────

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<(T, Stat)>> {
        match self.get(path)? {
            Some((bytes, stat)) => {
                let value = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                Ok(Some((value, stat)))
            }
            None => Ok(None),
        }
    }

    pub fn create_json<T: Serialize>(&self, path: &str, value: &T) -> StoreResult<Stat> {
        self.create(path, to_bytes(value)?)
    }

    pub fn set_json<T: Serialize>(
        &self,
        path: &str,
        value: &T,
        expected_version: Option<u64>,
    ) -> StoreResult<Stat> {
        self.set(path, to_bytes(value)?, expected_version)
    }

    /// Create the node or overwrite it, whichever applies.
    pub fn put_json<T: Serialize>(&self, path: &str, value: &T) -> StoreResult<Stat> {
        let data = to_bytes(value)?;
        loop {
            let result = match self.exists(path)? {
                Some(stat) => self.set(path, data.clone(), Some(stat.version)),
                None => self.create(path, data.clone()),
            };
            match result {
                // Lost a race with another writer; re-read and retry.
                Err(StoreError::NodeExists(_) | StoreError::NoNode(_) | StoreError::BadVersion { .. }) => {
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Typed [`CoordStore::list`]. Values that fail to parse are an error.
    pub fn list_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Vec<(String, T, Stat)>> {
        self.list(path)?
            .into_iter()
            .map(|(name, bytes, stat)| {
                let value = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                Ok((name, value, stat))
            })
            .collect()
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Open a session that will own ephemeral nodes.
    pub fn open_session(&self) -> Session {
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions.lock().insert(id);
        debug!(session = id, "session opened");
        Session::new(self, id)
    }

    pub fn is_session_live(&self, id: SessionId) -> bool {
        self.inner.sessions.lock().contains(&id)
    }

    /// End a session and delete every ephemeral node it owns.
    /// Returns the number of nodes removed.
    pub fn expire_session(&self, id: SessionId) -> StoreResult<usize> {
        let removed = {
            let mut sessions = self.inner.sessions.lock();
            sessions.remove(&id)
        };
        let purged = self.purge_ephemeral(|owner| owner == id)?;
        debug!(session = id, removed, purged, "session expired");
        Ok(purged)
    }

    fn purge_ephemeral(&self, owned: impl Fn(SessionId) -> bool) -> StoreResult<usize> {
        let _guard = self.inner.write_lock.lock();
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        let mut events = Vec::new();
        {
            let mut data = txn.open_table(NODE_DATA).map_err(map_err!(Table))?;
            let mut stats = txn.open_table(NODE_STAT).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in stats.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let stat: Stat =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if stat.ephemeral_owner.is_some_and(&owned) {
                    doomed.push((key.value().to_string(), stat.version));
                }
            }
            for (path, version) in &doomed {
                data.remove(path.as_str()).map_err(map_err!(Write))?;
                stats.remove(path.as_str()).map_err(map_err!(Write))?;
                events.push(WatchEvent {
                    kind: EventKind::Deleted,
                    path: path.clone(),
                    version: *version,
                });
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let count = events.len();
        self.publish(events);
        Ok(count)
    }

    // ── Watches ────────────────────────────────────────────────────

    /// Subscribe to every change committed under `prefix` from now on.
    pub fn watch(&self, prefix: &str) -> Watcher {
        Watcher::new(prefix.to_string(), self.inner.events.subscribe())
    }

    /// Must be called with the write lock held.
    fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            debug!(path = %event.path, kind = ?event.kind, version = event.version, "node changed");
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }
    }
}

/// The failing op's own error, for single-op transactions.
pub(crate) fn unwrap_single(e: StoreError) -> StoreError {
    match e {
        StoreError::TransactionFailed { source, .. } => *source,
        other => other,
    }
}

fn child_prefix(path: &str) -> StoreResult<String> {
    if path == "/" {
        return Ok("/".to_string());
    }
    validate_path(path)?;
    Ok(format!("{path}/"))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn read_stat(
    stats: &impl ReadableTable<&'static str, &'static [u8]>,
    path: &str,
) -> StoreResult<Option<Stat>> {
    match stats.get(path).map_err(map_err!(Read))? {
        Some(guard) => {
            let stat = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(stat))
        }
        None => Ok(None),
    }
}

type Applied = (Vec<Option<Stat>>, Vec<WatchEvent>);

fn apply_all(txn: &WriteTransaction, ops: Vec<Op>, live: &HashSet<SessionId>) -> StoreResult<Applied> {
    let mut tx = Tx {
        data: txn.open_table(NODE_DATA).map_err(map_err!(Table))?,
        stats: txn.open_table(NODE_STAT).map_err(map_err!(Table))?,
        now: now_millis(),
        events: Vec::new(),
    };
    let mut results = Vec::with_capacity(ops.len());
    for (index, op) in ops.into_iter().enumerate() {
        let stat = tx
            .apply(op, live)
            .map_err(|source| StoreError::TransactionFailed {
                index,
                source: Box::new(source),
            })?;
        results.push(stat);
    }
    Ok((results, tx.events))
}

/// Open tables of one write transaction plus the events it will publish.
struct Tx<'t> {
    data: Table<'t, &'static str, &'static [u8]>,
    stats: Table<'t, &'static str, &'static [u8]>,
    now: u64,
    events: Vec<WatchEvent>,
}

impl Tx<'_> {
    fn apply(&mut self, op: Op, live: &HashSet<SessionId>) -> StoreResult<Option<Stat>> {
        match op {
            Op::Check { path, version } => {
                let stat = self.require(&path, version)?;
                Ok(Some(stat))
            }
            Op::Create {
                path,
                data,
                ephemeral_owner,
            } => {
                if read_stat(&self.stats, &path)?.is_some() {
                    return Err(StoreError::NodeExists(path));
                }
                if let Some(owner) = ephemeral_owner
                    && !live.contains(&owner)
                {
                    return Err(StoreError::SessionClosed(owner));
                }
                let stat = Stat {
                    version: 0,
                    ephemeral_owner,
                    ctime: self.now,
                    mtime: self.now,
                };
                self.write(&path, &data, &stat)?;
                self.events.push(WatchEvent {
                    kind: EventKind::Created,
                    path,
                    version: 0,
                });
                Ok(Some(stat))
            }
            Op::Set {
                path,
                data,
                version,
            } => {
                let current = self.require(&path, version)?;
                let stat = Stat {
                    version: current.version + 1,
                    mtime: self.now,
                    ..current
                };
                self.write(&path, &data, &stat)?;
                self.events.push(WatchEvent {
                    kind: EventKind::Changed,
                    path,
                    version: stat.version,
                });
                Ok(Some(stat))
            }
            Op::Delete { path, version } => {
                let current = self.require(&path, version)?;
                if self.has_descendants(&path)? {
                    return Err(StoreError::NotEmpty(path));
                }
                self.data.remove(path.as_str()).map_err(map_err!(Write))?;
                self.stats.remove(path.as_str()).map_err(map_err!(Write))?;
                self.events.push(WatchEvent {
                    kind: EventKind::Deleted,
                    path,
                    version: current.version,
                });
                Ok(None)
            }
        }
    }

    fn require(&self, path: &str, version: Option<u64>) -> StoreResult<Stat> {
        let stat = read_stat(&self.stats, path)?.ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        match version {
            Some(expected) if expected != stat.version => Err(StoreError::BadVersion {
                path: path.to_string(),
                expected,
                actual: stat.version,
            }),
            _ => Ok(stat),
        }
    }

    fn write(&mut self, path: &str, data: &[u8], stat: &Stat) -> StoreResult<()> {
        let stat_bytes = to_bytes(stat)?;
        self.data.insert(path, data).map_err(map_err!(Write))?;
        self.stats
            .insert(path, stat_bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn has_descendants(&self, path: &str) -> StoreResult<bool> {
        let prefix = format!("{path}/");
        let mut range = self
            .stats
            .range::<&str>(prefix.as_str()..)
            .map_err(map_err!(Read))?;
        match range.next() {
            Some(entry) => {
                let (key, _) = entry.map_err(map_err!(Read))?;
                Ok(key.value().starts_with(&prefix))
            }
            None => Ok(false),
        }
    }
}
