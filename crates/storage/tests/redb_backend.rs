//! Integration tests for the redb backend.

use stashq_storage::{RedbStorage, Storage};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> RedbStorage {
    RedbStorage::open(dir.path().join("test.redb")).unwrap()
}

#[test]
fn point_operations_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    assert_eq!(store.get(b"k").unwrap(), None);
    store.put(b"k", b"v1").unwrap();
    assert_eq!(store.get(b"k").unwrap(), Some(b"v1".to_vec()));
    assert!(store.exists(b"k").unwrap());

    store.put(b"k", b"v2").unwrap();
    assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));

    store.delete(b"k").unwrap();
    assert_eq!(store.get(b"k").unwrap(), None);
    assert!(!store.exists(b"k").unwrap());
}

#[test]
fn data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        store.put(b"persisted", b"value").unwrap();
    }
    let store = open_store(&dir);
    assert_eq!(store.get(b"persisted").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn scan_prefix_is_bounded_and_ordered() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for key in ["g:2", "g:1", "g:10", "h:1"] {
        store.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    let entries = store.scan_prefix(b"g:").unwrap();
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, [b"g:1".as_slice(), b"g:10", b"g:2"]);
}

#[test]
fn scan_range_inclusive_with_limit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for key in ["a", "b", "c", "d"] {
        store.put(key.as_bytes(), b"x").unwrap();
    }
    assert_eq!(store.scan_range(b"b", b"d", 0).unwrap().len(), 3);
    assert_eq!(store.scan_range(b"b", b"d", 2).unwrap().len(), 2);
    assert!(store.scan_range(b"d", b"b", 0).unwrap().is_empty());
}

#[test]
fn batch_commit_applies_all_mutations() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.put(b"doomed", b"x").unwrap();

    store.batch_begin().unwrap();
    store.batch_put(b"a", b"1").unwrap();
    store.batch_put(b"b", b"2").unwrap();
    store.batch_delete(b"doomed").unwrap();
    assert_eq!(store.get(b"a").unwrap(), None);

    store.batch_commit().unwrap();
    assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.get(b"doomed").unwrap(), None);
}

#[test]
fn batch_rollback_discards_and_reopens() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.batch_begin().unwrap();
    store.batch_put(b"k", b"v").unwrap();
    assert!(store.batch_begin().is_err());
    store.batch_rollback().unwrap();
    assert_eq!(store.get(b"k").unwrap(), None);

    store.batch_begin().unwrap();
    store.batch_commit().unwrap();
}

#[test]
fn staging_without_open_batch_fails() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert!(store.batch_put(b"k", b"v").is_err());
    assert!(store.batch_delete(b"k").is_err());
    assert!(store.batch_commit().is_err());
}
