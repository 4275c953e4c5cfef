//! File-backed storage over redb.
//!
//! One data table multiplexes every key kind; the key schema upstream keeps
//! them apart. redb commits are synchronous, so `put`, `delete`, and
//! `batch_commit` only return after the write transaction reached stable
//! media. A staged batch is applied inside a single write transaction, which
//! gives the all-or-nothing commit the batch contract requires.

use crate::{batch_already_open, no_open_batch, StagedBatch, StagedOp, Storage};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use stashq_core::{Error, Result};
use std::fmt::Display;
use std::path::Path;

const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

/// Durable ordered store backed by a single redb file.
pub struct RedbStorage {
    db: Database,
    staged: Mutex<Option<StagedBatch>>,
}

fn store_err(e: impl Display) -> Error {
    Error::Storage(e.to_string())
}

impl RedbStorage {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let open_err = |e: &dyn Display| Error::StorageInit(e.to_string());
        let db = Database::create(path.as_ref()).map_err(|e| open_err(&e))?;
        let txn = db.begin_write().map_err(|e| open_err(&e))?;
        {
            let _ = txn.open_table(DATA_TABLE).map_err(|e| open_err(&e))?;
        }
        txn.commit().map_err(|e| open_err(&e))?;
        Ok(Self {
            db,
            staged: Mutex::new(None),
        })
    }
}

impl Storage for RedbStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(DATA_TABLE).map_err(store_err)?;
            table.insert(key, value).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(store_err)?;
        Ok(table
            .get(key)
            .map_err(store_err)?
            .map(|guard| guard.value().to_vec()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(DATA_TABLE).map_err(store_err)?;
            table.remove(key).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(store_err)?;
        let mut out = Vec::new();
        for entry in table.range(prefix..).map_err(store_err)? {
            let (key, value) = entry.map_err(store_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn scan_range(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start > end {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(store_err)?;
        let mut out = Vec::new();
        for entry in table.range(start..=end).map_err(store_err)? {
            let (key, value) = entry.map_err(store_err)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
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
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(DATA_TABLE).map_err(store_err)?;
            for op in &staged.ops {
                match op {
                    StagedOp::Put(key, value) => {
                        table.insert(key.as_slice(), value.as_slice()).map_err(store_err)?;
                    }
                    StagedOp::Delete(key) => {
                        table.remove(key.as_slice()).map_err(store_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn batch_rollback(&self) -> Result<()> {
        self.staged.lock().take();
        Ok(())
    }
}
