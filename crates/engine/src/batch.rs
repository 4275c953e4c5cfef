//! Batch lifecycle: create, load once, acknowledge.
//!
//! A batch moves through a one-way state machine:
//!
//! ```text
//!                create               mark_loaded            acknowledge
//! (non-existent) -----> PENDING --------------------> LOADED -----------> (non-existent)
//!                          |                             |
//!                          +--------------- acknowledge -+
//! ```
//!
//! `mark_loaded` is the single-delivery gate: once a batch has been loaded
//! it is never handed out again. The store offers no compare-and-swap, so
//! every read-modify-write here is serialized by the manager's mutex.

use parking_lot::Mutex;
use stashq_core::types::{BatchMetadata, BatchStatus};
use stashq_core::{keys, ulid, Error, Result};
use stashq_storage::Storage;
use std::sync::Arc;

/// Owns batch metadata records and their state transitions.
pub struct BatchManager {
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
}

impl BatchManager {
    /// Create a manager over a shared store handle.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Create a pending batch covering `[sequence_start, sequence_end]` and
    /// return its id.
    pub fn create_batch(
        &self,
        group: &str,
        session: &str,
        sequence_start: i64,
        sequence_end: i64,
    ) -> Result<String> {
        let _guard = self.lock.lock();
        let (batch_id, key, value) = self.build_pending(group, session, sequence_start, sequence_end)?;
        self.storage.put(key.as_bytes(), &value)?;
        Ok(batch_id)
    }

    /// Stage a new pending batch's metadata into the caller's open write
    /// batch and return its id.
    ///
    /// The record only becomes visible when the caller commits, which lets a
    /// new batch appear atomically with other staged mutations. The caller
    /// must have begun a write batch.
    pub fn stage_batch(
        &self,
        group: &str,
        session: &str,
        sequence_start: i64,
        sequence_end: i64,
    ) -> Result<String> {
        let _guard = self.lock.lock();
        let (batch_id, key, value) = self.build_pending(group, session, sequence_start, sequence_end)?;
        self.storage.batch_put(key.as_bytes(), &value)?;
        Ok(batch_id)
    }

    /// Mint a fresh pending record; the metadata key must be absent.
    fn build_pending(
        &self,
        group: &str,
        session: &str,
        sequence_start: i64,
        sequence_end: i64,
    ) -> Result<(String, String, Vec<u8>)> {
        let batch_id = ulid::generate();
        let key = keys::batch_meta_key(group, session, &batch_id);
        if self.storage.exists(key.as_bytes())? {
            return Err(Error::Storage(format!(
                "batch metadata already present: {batch_id}"
            )));
        }
        let metadata = BatchMetadata {
            batch_id: batch_id.clone(),
            sequence_start,
            sequence_end,
            status: BatchStatus::Pending,
            created_at: ulid::now_ms() as i64,
            loaded_at: 0,
        };
        let value = serde_json::to_vec(&metadata)?;
        Ok((batch_id, key, value))
    }

    /// Read a batch's metadata record.
    pub fn batch_metadata(&self, group: &str, session: &str, batch_id: &str) -> Result<BatchMetadata> {
        let _guard = self.lock.lock();
        self.read_metadata(group, session, batch_id)
    }

    /// Transition a batch to loaded.
    ///
    /// Returns `Ok(false)` without touching the record when the batch is
    /// already loaded - the caller lost the race and must skip it.
    pub fn mark_loaded(&self, group: &str, session: &str, batch_id: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut metadata = self.read_metadata(group, session, batch_id)?;
        if metadata.status == BatchStatus::Loaded {
            return Ok(false);
        }
        metadata.status = BatchStatus::Loaded;
        metadata.loaded_at = ulid::now_ms() as i64;
        let key = keys::batch_meta_key(group, session, batch_id);
        self.storage
            .put(key.as_bytes(), &serde_json::to_vec(&metadata)?)?;
        Ok(true)
    }

    /// Delete a batch's metadata and every payload key in its range, in one
    /// atomic write batch. Returns the deleted record.
    pub fn acknowledge(&self, group: &str, session: &str, batch_id: &str) -> Result<BatchMetadata> {
        let _guard = self.lock.lock();
        let metadata = self.read_metadata(group, session, batch_id)?;
        self.storage.batch_begin()?;
        if let Err(e) = self.stage_removal(group, session, &metadata) {
            if let Err(rollback_err) = self.storage.batch_rollback() {
                tracing::warn!(batch = batch_id, error = %rollback_err, "rollback failed");
            }
            return Err(e);
        }
        self.storage.batch_commit()?;
        Ok(metadata)
    }

    /// Up to `max` pending batch ids in FIFO order.
    ///
    /// FIFO is ascending `sequence_start`, ties broken by batch id.
    pub fn loadable_batches(&self, group: &str, session: &str, max: usize) -> Result<Vec<String>> {
        let _guard = self.lock.lock();
        let mut pending = self.scan_metadata(group, session)?;
        pending.retain(|m| m.status == BatchStatus::Pending);
        pending.sort_by(|a, b| {
            a.sequence_start
                .cmp(&b.sequence_start)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(pending.into_iter().take(max).map(|m| m.batch_id).collect())
    }

    /// Find the batch whose range contains `sequence_id`.
    pub fn find_batch_for_sequence(
        &self,
        group: &str,
        session: &str,
        sequence_id: i64,
    ) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        self.find_for_sequence(group, session, sequence_id)
    }

    /// The payload key of `sequence_id`, if some batch covers it.
    pub fn payload_key_for_sequence(
        &self,
        group: &str,
        session: &str,
        sequence_id: i64,
    ) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self
            .find_for_sequence(group, session, sequence_id)?
            .map(|batch_id| keys::payload_key(group, session, &batch_id, sequence_id)))
    }

    fn find_for_sequence(&self, group: &str, session: &str, sequence_id: i64) -> Result<Option<String>> {
        Ok(self
            .scan_metadata(group, session)?
            .into_iter()
            .find(|m| m.contains(sequence_id))
            .map(|m| m.batch_id))
    }

    /// All parseable metadata records of a session. Corrupt records are
    /// skipped here; operations addressing a batch directly report them.
    fn scan_metadata(&self, group: &str, session: &str) -> Result<Vec<BatchMetadata>> {
        let prefix = keys::batch_meta_prefix(group, session);
        let entries = self.storage.scan_prefix(prefix.as_bytes())?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<BatchMetadata>(&value) {
                Ok(metadata) => records.push(metadata),
                Err(_) => {
                    tracing::debug!(key = %String::from_utf8_lossy(&key), "skipping unparseable batch record")
                }
            }
        }
        Ok(records)
    }

    fn read_metadata(&self, group: &str, session: &str, batch_id: &str) -> Result<BatchMetadata> {
        let key = keys::batch_meta_key(group, session, batch_id);
        let raw = self
            .storage
            .get(key.as_bytes())?
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;
        serde_json::from_slice(&raw).map_err(|_| Error::CorruptedBatch(batch_id.to_string()))
    }

    fn stage_removal(&self, group: &str, session: &str, metadata: &BatchMetadata) -> Result<()> {
        let meta_key = keys::batch_meta_key(group, session, &metadata.batch_id);
        self.storage.batch_delete(meta_key.as_bytes())?;
        for key in keys::payload_keys(
            group,
            session,
            &metadata.batch_id,
            metadata.sequence_start,
            metadata.sequence_end,
        ) {
            self.storage.batch_delete(key.as_bytes())?;
        }
        Ok(())
    }
}
