//! Failure-injection tests: multi-key transitions either land whole or not
//! at all.

use stashq::{Error, GroupStore, MemoryStorage, Result, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Storage wrapper that fails batch commits on demand.
#[derive(Default)]
struct CommitFailStorage {
    inner: MemoryStorage,
    fail_commit: AtomicBool,
}

impl Storage for CommitFailStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }
    fn scan_range(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_range(start, end, limit)
    }
    fn batch_begin(&self) -> Result<()> {
        self.inner.batch_begin()
    }
    fn batch_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.batch_put(key, value)
    }
    fn batch_delete(&self, key: &[u8]) -> Result<()> {
        self.inner.batch_delete(key)
    }
    fn batch_commit(&self) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            self.inner.batch_rollback()?;
            return Err(Error::Storage("injected commit failure".to_string()));
        }
        self.inner.batch_commit()
    }
    fn batch_rollback(&self) -> Result<()> {
        self.inner.batch_rollback()
    }
}

fn store_with_failing_commits() -> (Arc<CommitFailStorage>, GroupStore) {
    let storage = Arc::new(CommitFailStorage::default());
    let store = GroupStore::with_storage(storage.clone());
    (storage, store)
}

#[test]
fn failed_acknowledge_changes_nothing() {
    let (storage, store) = store_with_failing_commits();
    store.initialize_session("g").unwrap();
    store.save("g", "a").unwrap();
    store.save("g", "b").unwrap();

    let batches = store.load_batch("g", 100).unwrap();
    let batch_id = batches[0].batch_id.clone();

    storage.fail_commit.store(true, Ordering::SeqCst);
    assert!(store.acknowledge_batch("g", &batch_id).is_err());

    // The batch and its payloads are still fully present.
    assert_eq!(store.load("g").unwrap(), [b"a".to_vec(), b"b".to_vec()]);

    storage.fail_commit.store(false, Ordering::SeqCst);
    store.acknowledge_batch("g", &batch_id).unwrap();
    assert!(store.load("g").unwrap().is_empty());
}

#[test]
fn failed_resave_keeps_the_original_and_no_phantom_batch() {
    let (storage, store) = store_with_failing_commits();
    store.initialize_session("g").unwrap();
    store.save("g", "a").unwrap();
    store.save("g", "b").unwrap();
    store.save("g", "c").unwrap();

    let batches = store.load_batch("g", 100).unwrap();
    let batch_id = batches[0].batch_id.clone();
    let remainder = vec![b"b".to_vec(), b"c".to_vec()];

    storage.fail_commit.store(true, Ordering::SeqCst);
    assert!(store.resave_batch("g", &batch_id, &remainder).is_err());

    // The original batch survived untouched and no replacement appeared:
    // the peek still sees the original payloads, and nothing is loadable
    // (the original stays loaded, the new batch never came into being).
    assert_eq!(
        store.load("g").unwrap(),
        [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert!(store.load_batch("g", 100).unwrap().is_empty());

    storage.fail_commit.store(false, Ordering::SeqCst);
    store.resave_batch("g", &batch_id, &remainder).unwrap();

    let batches = store.load_batch("g", 100).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].data, remainder);
}
