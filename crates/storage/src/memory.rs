//! In-process storage backend.
//!
//! A `BTreeMap` behind a mutex, with the same scan and write-batch semantics
//! as the file-backed store. Nothing is persisted; intended for ephemeral
//! stores and tests.

use crate::{batch_already_open, no_open_batch, StagedBatch, StagedOp, Storage};
use parking_lot::Mutex;
use stashq_core::Result;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered in-memory store.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    staged: Mutex<Option<StagedBatch>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.lock();
        let mut out = Vec::new();
        for (key, value) in data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.clone(), value.clone()));
        }
        Ok(out)
    }

    fn scan_range(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start > end {
            return Ok(Vec::new());
        }
        let data = self.data.lock();
        let mut out = Vec::new();
        for (key, value) in data.range::<[u8], _>((Bound::Included(start), Bound::Included(end))) {
            out.push((key.clone(), value.clone()));
            if limit != 0 && out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    fn batch_begin(&self) -> Result<()> {
        let mut staged = self.staged.lock();
        if staged.is_some() {
            return Err(batch_already_open());
        }
        *staged = Some(StagedBatch::default());
        Ok(())
    }

    fn batch_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.staged
            .lock()
            .as_mut()
            .ok_or_else(no_open_batch)?
            .ops
            .push(StagedOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn batch_delete(&self, key: &[u8]) -> Result<()> {
        self.staged
            .lock()
            .as_mut()
            .ok_or_else(no_open_batch)?
            .ops
            .push(StagedOp::Delete(key.to_vec()));
        Ok(())
    }

    fn batch_commit(&self) -> Result<()> {
        let staged = self.staged.lock().take().ok_or_else(no_open_batch)?;
        let mut data = self.data.lock();
        for op in staged.ops {
            match op {
                StagedOp::Put(key, value) => {
                    data.insert(key, value);
                }
                StagedOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn batch_rollback(&self) -> Result<()> {
        self.staged.lock().take();
        Ok(())
    }
}
