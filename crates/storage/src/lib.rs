//! Ordered key-value store abstraction for stashq.
//!
//! The engine and facade layers talk to storage only through the [`Storage`]
//! trait: point operations, ordered scans, and a single staged write batch
//! per handle whose commit is atomic and durable. Two backends implement it:
//!
//! - [`RedbStorage`] - file-backed, synchronous commits, for production.
//! - [`MemoryStorage`] - `BTreeMap`-backed, for ephemeral stores and tests.

#![warn(missing_docs)]

pub mod memory;
pub mod redb;

pub use memory::MemoryStorage;
pub use redb::RedbStorage;

use stashq_core::{Error, Result};

/// Ordered byte-keyed, byte-valued store.
///
/// # Scans
///
/// `scan_prefix` and `scan_range` return entries in ascending byte order of
/// their keys. `scan_range` bounds are inclusive; a `limit` of zero means
/// unlimited.
///
/// # Write batches
///
/// At most one write batch may be staged per handle. `batch_begin` while one
/// is open is an error, as is staging without an open batch. `batch_commit`
/// applies every staged mutation atomically and durably, or none of them;
/// success or failure, the staged batch is consumed. `batch_rollback`
/// discards an open batch and is a no-op without one.
///
/// # Failures
///
/// Any operation may fail transiently; a failed operation has not happened.
/// `put`, `delete`, and `batch_commit` are synced to stable media before
/// returning success, and reads observe writes that returned success.
pub trait Storage: Send + Sync {
    /// Store `value` at `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Fetch the value at `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check whether `key` is present.
    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose keys start with `prefix`, ascending.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Entries in `[start, end]` inclusive, ascending, at most `limit`
    /// (zero = unlimited).
    fn scan_range(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Open a new staged write batch.
    fn batch_begin(&self) -> Result<()>;

    /// Stage a put into the open batch.
    fn batch_put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Stage a delete into the open batch.
    fn batch_delete(&self, key: &[u8]) -> Result<()>;

    /// Atomically apply the open batch.
    fn batch_commit(&self) -> Result<()>;

    /// Discard the open batch, if any.
    fn batch_rollback(&self) -> Result<()>;
}

pub(crate) enum StagedOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Mutations staged between `batch_begin` and `batch_commit`.
#[derive(Default)]
pub(crate) struct StagedBatch {
    pub(crate) ops: Vec<StagedOp>,
}

pub(crate) fn batch_already_open() -> Error {
    Error::Storage("write batch already open".to_string())
}

pub(crate) fn no_open_batch() -> Error {
    Error::Storage("no open write batch".to_string())
}
