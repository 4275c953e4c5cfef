//! Group store facade.
//!
//! [`GroupStore`] is the only surface callers touch. It binds each group key
//! to a session, assigns monotone sequence ids, decides batch boundaries on
//! write, and orchestrates load, acknowledge, and resave through the session
//! and batch managers.

use parking_lot::Mutex;
use stashq_core::types::{BatchMetadata, BatchStatus};
use stashq_core::{keys, Error, Result};
use stashq_engine::{BatchManager, SessionManager, DEFAULT_HEARTBEAT_INTERVAL};
use stashq_storage::{MemoryStorage, RedbStorage, Storage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default number of sequence ids per batch bucket.
pub const DEFAULT_BATCH_SIZE: usize = 100;

const STORE_FILE: &str = "stashq.redb";

/// One batch pulled by [`GroupStore::load_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLoadResult {
    /// ULID of the batch.
    pub batch_id: String,
    /// Payloads of the batch, FIFO order.
    pub data: Vec<Vec<u8>>,
    /// First sequence id of the batch's range (inclusive).
    pub sequence_start: i64,
    /// Last sequence id of the batch's range (inclusive).
    pub sequence_end: i64,
}

/// Facade-side state of one group.
#[derive(Default)]
struct GroupState {
    session_id: String,
    next_seq: i64,
    /// Bucket start -> batch currently accepting saves there.
    open_batches: HashMap<i64, OpenBatch>,
}

/// In-memory handle on a batch that still accepts saves.
struct OpenBatch {
    batch_id: String,
    sequence_end: i64,
}

/// Durable per-group FIFO batch queue.
///
/// Producers [`save`](GroupStore::save) opaque payloads under a group key;
/// consumers pull them with [`load_batch`](GroupStore::load_batch) in FIFO
/// order, [`acknowledge_batch`](GroupStore::acknowledge_batch) to release
/// storage, or [`resave_batch`](GroupStore::resave_batch) an unprocessed
/// suffix. Every entry point is safe to call from any thread.
///
/// # Example
///
/// ```no_run
/// use stashq::GroupStore;
///
/// # fn main() -> stashq::Result<()> {
/// let store = GroupStore::open("./queue-data")?;
/// store.initialize_session("events")?;
///
/// store.save("events", b"first")?;
/// store.save("events", b"second")?;
///
/// for batch in store.load_batch("events", 10)? {
///     for payload in &batch.data {
///         // process payload
///     }
///     store.acknowledge_batch("events", &batch.batch_id)?;
/// }
/// store.close();
/// # Ok(())
/// # }
/// ```
pub struct GroupStore {
    storage: Arc<dyn Storage>,
    sessions: SessionManager,
    batches: BatchManager,
    groups: Mutex<HashMap<String, GroupState>>,
    batch_size: AtomicUsize,
    heartbeat_interval: Duration,
    _temp_dir: Option<tempfile::TempDir>,
}

impl GroupStore {
    /// Open a disk-backed store under the directory `path`.
    ///
    /// Uses default settings; see [`GroupStore::builder`] for configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Create an in-memory store with no disk I/O.
    ///
    /// Nothing survives drop. Use for unit tests and temporary queues.
    pub fn ephemeral() -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        Ok(Self::from_storage(
            storage,
            DEFAULT_BATCH_SIZE,
            DEFAULT_HEARTBEAT_INTERVAL,
            None,
        ))
    }

    /// Build a store over a caller-provided storage backend.
    ///
    /// Any ordered store satisfying the [`Storage`] contract works; the
    /// bundled backends cover the common cases.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self::from_storage(storage, DEFAULT_BATCH_SIZE, DEFAULT_HEARTBEAT_INTERVAL, None)
    }

    /// Create a builder for store configuration.
    pub fn builder() -> GroupStoreBuilder {
        GroupStoreBuilder::new()
    }

    fn from_storage(
        storage: Arc<dyn Storage>,
        batch_size: usize,
        heartbeat_interval: Duration,
        temp_dir: Option<tempfile::TempDir>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(Arc::clone(&storage)),
            batches: BatchManager::new(Arc::clone(&storage)),
            storage,
            groups: Mutex::new(HashMap::new()),
            batch_size: AtomicUsize::new(batch_size),
            heartbeat_interval,
            _temp_dir: temp_dir,
        }
    }

    /// Start a session for `group` and the heartbeat worker.
    ///
    /// A group that already has a session gets a fresh one; its queue
    /// namespace starts clean. At most one heartbeat worker runs per store.
    pub fn initialize_session(&self, group: &str) -> Result<()> {
        let mut groups = self.groups.lock();
        self.initialize_session_locked(&mut groups, group)?;
        Ok(())
    }

    fn initialize_session_locked(
        &self,
        groups: &mut HashMap<String, GroupState>,
        group: &str,
    ) -> Result<()> {
        let session_id = self.sessions.initialize(group)?;
        let state = groups.entry(group.to_string()).or_default();
        state.session_id = session_id;
        state.open_batches.clear();
        self.sessions.start_heartbeat(self.heartbeat_interval);
        Ok(())
    }

    /// End `group`'s session and drop its in-memory state.
    ///
    /// Best-effort on the persisted record; never fails.
    pub fn terminate_session(&self, group: &str) {
        let mut groups = self.groups.lock();
        self.sessions.terminate(group);
        groups.remove(group);
    }

    /// Append one payload to `group`'s queue.
    ///
    /// Creates the session lazily on first use. Sequence ids are assigned
    /// monotonically per group starting at zero; each run of `batch_size`
    /// consecutive ids shares one batch.
    pub fn save(&self, group: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        let mut groups = self.groups.lock();
        let needs_session = groups.get(group).map_or(true, |s| s.session_id.is_empty());
        if needs_session {
            self.initialize_session_locked(&mut groups, group)?;
        }
        let batch_size = self.batch_size.load(Ordering::Relaxed) as i64;
        let Some(state) = groups.get_mut(group) else {
            return Err(Error::SessionNotFound(group.to_string()));
        };
        let session_id = state.session_id.clone();

        let seq = state.next_seq;
        state.next_seq += 1;

        // An open batch whose range still covers this sequence keeps
        // accepting saves, even across a batch-size change.
        let reusable = state
            .open_batches
            .values()
            .find(|open| seq <= open.sequence_end)
            .map(|open| open.batch_id.clone());
        let batch_id = match reusable {
            Some(id) => id,
            None => {
                state.open_batches.retain(|_, open| open.sequence_end >= seq);
                let bucket = (seq / batch_size) * batch_size;
                let bucket_end = bucket + batch_size - 1;
                let id = self.batches.create_batch(group, &session_id, seq, bucket_end)?;
                state.open_batches.insert(
                    bucket,
                    OpenBatch {
                        batch_id: id.clone(),
                        sequence_end: bucket_end,
                    },
                );
                id
            }
        };

        let key = keys::payload_key(group, &session_id, &batch_id, seq);
        self.storage.put(key.as_bytes(), payload.as_ref())
    }

    /// Pull up to `max_batches` batches in FIFO order, each delivered at
    /// most once.
    ///
    /// A group without a session yields an empty list. Batches another
    /// consumer loaded concurrently are skipped. Payload keys that fail to
    /// read inside a batch's written range are counted and logged, then
    /// treated as already consumed.
    pub fn load_batch(&self, group: &str, max_batches: usize) -> Result<Vec<BatchLoadResult>> {
        let mut groups = self.groups.lock();
        let Some(session_id) = groups.get(group).map(|s| s.session_id.clone()) else {
            return Ok(Vec::new());
        };
        let batch_ids = self.batches.loadable_batches(group, &session_id, max_batches)?;
        let mut results = Vec::with_capacity(batch_ids.len());
        for batch_id in batch_ids {
            if !self.batches.mark_loaded(group, &session_id, &batch_id)? {
                continue;
            }
            let metadata = self.batches.batch_metadata(group, &session_id, &batch_id)?;
            if let Some(state) = groups.get_mut(group) {
                Self::retire_open_batch(state, &metadata);
            }

            let mut data = Vec::new();
            let mut gaps = 0usize;
            let mut pending_gaps = 0usize;
            for key in keys::payload_keys(
                group,
                &session_id,
                &batch_id,
                metadata.sequence_start,
                metadata.sequence_end,
            ) {
                match self.storage.get(key.as_bytes())? {
                    Some(value) => {
                        gaps += pending_gaps;
                        pending_gaps = 0;
                        data.push(value);
                    }
                    // Unwritten tail of a partially filled bucket, unless a
                    // later key turns up.
                    None => pending_gaps += 1,
                }
            }
            if gaps > 0 {
                tracing::warn!(group, batch = %batch_id, missing = gaps, "missing payload keys inside loaded batch");
            }

            results.push(BatchLoadResult {
                batch_id,
                data,
                sequence_start: metadata.sequence_start,
                sequence_end: metadata.sequence_end,
            });
        }
        Ok(results)
    }

    /// Read every payload of `group`'s current session in FIFO order,
    /// without any state transition.
    ///
    /// Unlike [`load_batch`](GroupStore::load_batch) this is a peek: loaded
    /// but unacknowledged batches are still visible, and repeated calls
    /// return the same data until batches are acknowledged.
    pub fn load(&self, group: &str) -> Result<Vec<Vec<u8>>> {
        let groups = self.groups.lock();
        let Some(session_id) = groups.get(group).map(|s| s.session_id.clone()) else {
            return Ok(Vec::new());
        };
        let prefix = keys::batch_meta_prefix(group, &session_id);
        let entries = self.storage.scan_prefix(prefix.as_bytes())?;
        let mut batches: Vec<BatchMetadata> = entries
            .iter()
            .filter_map(|(_, value)| serde_json::from_slice(value).ok())
            .collect();
        batches.sort_by(|a, b| {
            a.sequence_start
                .cmp(&b.sequence_start)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });

        let mut data = Vec::new();
        for metadata in batches {
            for key in keys::payload_keys(
                group,
                &session_id,
                &metadata.batch_id,
                metadata.sequence_start,
                metadata.sequence_end,
            ) {
                if let Some(value) = self.storage.get(key.as_bytes())? {
                    data.push(value);
                }
            }
        }
        Ok(data)
    }

    /// Acknowledge a delivered batch, deleting its metadata and payloads
    /// atomically.
    ///
    /// Repeating the call after success fails with
    /// [`Error::BatchNotFound`] - the record is already gone.
    pub fn acknowledge_batch(&self, group: &str, batch_id: &str) -> Result<()> {
        let mut groups = self.groups.lock();
        let Some(session_id) = groups.get(group).map(|s| s.session_id.clone()) else {
            return Err(Error::SessionNotFound(group.to_string()));
        };
        let metadata = self.batches.acknowledge(group, &session_id, batch_id)?;
        if let Some(state) = groups.get_mut(group) {
            Self::retire_open_batch(state, &metadata);
        }
        Ok(())
    }

    /// Replace a loaded batch with its unprocessed remainder.
    ///
    /// The remainder is appended at the tail of the queue under a fresh
    /// sequence range; the original batch is acknowledged. Both happen in
    /// one atomic write batch - on failure neither takes effect. An empty
    /// remainder degenerates to a plain acknowledge.
    pub fn resave_batch(&self, group: &str, batch_id: &str, remaining: &[Vec<u8>]) -> Result<()> {
        let mut groups = self.groups.lock();
        let Some(state) = groups.get_mut(group) else {
            return Err(Error::SessionNotFound(group.to_string()));
        };
        let session_id = state.session_id.clone();

        let original = self.batches.batch_metadata(group, &session_id, batch_id)?;
        if original.status != BatchStatus::Loaded {
            return Err(Error::BatchNotLoaded(batch_id.to_string()));
        }
        if remaining.is_empty() {
            self.batches.acknowledge(group, &session_id, batch_id)?;
            return Ok(());
        }

        // Never allocate the remainder inside a still-open batch's range;
        // batch ranges must stay disjoint.
        let mut next_seq = state.next_seq;
        for open in state.open_batches.values() {
            if next_seq <= open.sequence_end {
                next_seq = open.sequence_end + 1;
            }
        }
        state.next_seq = next_seq;
        state.open_batches.retain(|_, open| open.sequence_end >= next_seq);

        let sequence_start = state.next_seq;
        let sequence_end = sequence_start + remaining.len() as i64 - 1;
        state.next_seq = sequence_end + 1;

        // New metadata, new payloads, and the original's removal all ride
        // one commit; on failure neither side takes effect.
        self.storage.batch_begin()?;
        let staged = self
            .batches
            .stage_batch(group, &session_id, sequence_start, sequence_end)
            .and_then(|new_batch_id| {
                self.stage_resave(
                    group,
                    &session_id,
                    &new_batch_id,
                    sequence_start,
                    remaining,
                    &original,
                )
            });
        if let Err(e) = staged {
            if let Err(rollback_err) = self.storage.batch_rollback() {
                tracing::warn!(group, error = %rollback_err, "rollback failed after resave staging error");
            }
            return Err(e);
        }
        self.storage.batch_commit()
    }

    fn stage_resave(
        &self,
        group: &str,
        session_id: &str,
        new_batch_id: &str,
        sequence_start: i64,
        remaining: &[Vec<u8>],
        original: &BatchMetadata,
    ) -> Result<()> {
        for (offset, payload) in remaining.iter().enumerate() {
            let key = keys::payload_key(group, session_id, new_batch_id, sequence_start + offset as i64);
            self.storage.batch_put(key.as_bytes(), payload)?;
        }
        let meta_key = keys::batch_meta_key(group, session_id, &original.batch_id);
        self.storage.batch_delete(meta_key.as_bytes())?;
        for key in keys::payload_keys(
            group,
            session_id,
            &original.batch_id,
            original.sequence_start,
            original.sequence_end,
        ) {
            self.storage.batch_delete(key.as_bytes())?;
        }
        Ok(())
    }

    /// Once a batch leaves the pending state it accepts no more saves: drop
    /// the open-bucket entry pointing at it and move the sequence counter
    /// past its range so the next save opens a fresh batch.
    fn retire_open_batch(state: &mut GroupState, metadata: &BatchMetadata) {
        state
            .open_batches
            .retain(|_, open| open.batch_id != metadata.batch_id);
        if metadata.sequence_start <= state.next_seq && state.next_seq <= metadata.sequence_end {
            state.next_seq = metadata.sequence_end + 1;
        }
    }

    /// The current session id of `group`, if it has one.
    pub fn session_id(&self, group: &str) -> Option<String> {
        self.groups.lock().get(group).map(|s| s.session_id.clone())
    }

    /// Set the bucket size for batches opened from now on.
    ///
    /// Zero is ignored. Batches already open keep their range.
    pub fn set_batch_size(&self, batch_size: usize) {
        if batch_size > 0 {
            self.batch_size.store(batch_size, Ordering::Relaxed);
        }
    }

    /// The current bucket size.
    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Reclaim sessions of `group` whose heartbeat is older than `timeout`.
    ///
    /// Returns the number of sessions marked terminated. Pending batches of
    /// reclaimed sessions stay in the store; they are invisible to other
    /// sessions.
    pub fn cleanup_timeout_sessions(&self, group: &str, timeout: Duration) -> Result<usize> {
        self.sessions.cleanup_timeout_sessions(group, timeout.as_millis() as i64)
    }

    /// Gracefully shut down: terminate every known session (best-effort)
    /// and stop the heartbeat worker.
    ///
    /// The store must not be used afterwards. Dropping without `close`
    /// leaves session records active, as a crash would.
    pub fn close(&self) {
        let mut groups = self.groups.lock();
        let group_keys: Vec<String> = groups.keys().cloned().collect();
        for group in &group_keys {
            self.sessions.terminate(group);
        }
        groups.clear();
        drop(groups);
        self.sessions.stop_heartbeat();
        tracing::info!("group store closed");
    }
}

/// Builder for store configuration.
///
/// # Example
///
/// ```no_run
/// use stashq::GroupStore;
/// use std::time::Duration;
///
/// # fn main() -> stashq::Result<()> {
/// let store = GroupStore::builder()
///     .path("./queue-data")
///     .batch_size(500)
///     .heartbeat_interval(Duration::from_secs(1))
///     .open()?;
/// # Ok(())
/// # }
/// ```
pub struct GroupStoreBuilder {
    path: Option<PathBuf>,
    batch_size: usize,
    heartbeat_interval: Duration,
}

impl GroupStoreBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            path: None,
            batch_size: DEFAULT_BATCH_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Directory for the store's files.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Initial bucket size (default 100). Zero is ignored.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
        self
    }

    /// Heartbeat worker wake interval (default 5 s).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Open the store at the configured path.
    pub fn open(self) -> Result<GroupStore> {
        let path = self
            .path
            .ok_or_else(|| Error::StorageInit("no store path configured".to_string()))?;
        std::fs::create_dir_all(&path)?;
        let storage: Arc<dyn Storage> = Arc::new(RedbStorage::open(path.join(STORE_FILE))?);
        tracing::info!(path = %path.display(), "group store opened");
        Ok(GroupStore::from_storage(
            storage,
            self.batch_size,
            self.heartbeat_interval,
            None,
        ))
    }

    /// Open a store in a fresh temporary directory, removed when the store
    /// is dropped. Useful for integration tests.
    pub fn open_temp(self) -> Result<GroupStore> {
        let dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(RedbStorage::open(dir.path().join(STORE_FILE))?);
        Ok(GroupStore::from_storage(
            storage,
            self.batch_size,
            self.heartbeat_interval,
            Some(dir),
        ))
    }
}

impl Default for GroupStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
