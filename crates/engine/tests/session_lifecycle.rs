//! Session lifecycle and heartbeat worker tests.

use stashq_core::types::{SessionState, SessionStatus};
use stashq_core::{keys, ulid, Error};
use stashq_engine::SessionManager;
use stashq_storage::{MemoryStorage, Storage};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<MemoryStorage>, SessionManager) {
    let storage = Arc::new(MemoryStorage::new());
    let manager = SessionManager::new(storage.clone());
    (storage, manager)
}

fn read_state(storage: &MemoryStorage, group: &str, session_id: &str) -> SessionState {
    let key = keys::session_state_key(group, session_id);
    let raw = storage.get(key.as_bytes()).unwrap().unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[test]
fn initialize_writes_active_record() {
    let (storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();
    assert!(ulid::is_valid(&session_id));
    assert_eq!(manager.session_id("g"), Some(session_id.clone()));

    let state = read_state(&storage, "g", &session_id);
    assert_eq!(state.session_id, session_id);
    assert_eq!(state.process_id, std::process::id() as i64);
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.started_at, state.last_heartbeat);
    assert!(state.started_at > 0);
}

#[test]
fn update_heartbeat_advances_timestamp() {
    let (storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();
    let before = read_state(&storage, "g", &session_id);

    std::thread::sleep(Duration::from_millis(5));
    manager.update_heartbeat("g").unwrap();

    let after = read_state(&storage, "g", &session_id);
    assert!(after.last_heartbeat > before.last_heartbeat);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(after.status, SessionStatus::Active);
}

#[test]
fn update_heartbeat_requires_session() {
    let (_storage, manager) = setup();
    assert!(matches!(
        manager.update_heartbeat("g").unwrap_err(),
        Error::SessionNotFound(_)
    ));
}

#[test]
fn terminate_marks_record_and_forgets_group() {
    let (storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();

    manager.terminate("g");
    let state = read_state(&storage, "g", &session_id);
    assert_eq!(state.status, SessionStatus::Terminated);
    assert_eq!(manager.session_id("g"), None);

    // Heartbeats after termination are rejected, not applied.
    assert!(manager.update_heartbeat("g").is_err());
    // Terminating again is a no-op.
    manager.terminate("g");
}

#[test]
fn is_session_active_checks_persisted_record() {
    let (_storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();
    assert!(manager.is_session_active("g", &session_id).unwrap());

    manager.terminate("g");
    assert!(!manager.is_session_active("g", &session_id).unwrap());
    assert!(!manager.is_session_active("g", "unknown-session").unwrap());
}

#[test]
fn cleanup_reclaims_only_stale_active_sessions() {
    let (storage, manager) = setup();
    let stale_id = manager.initialize("g").unwrap();

    // Age the first session's heartbeat by rewriting its record.
    let key = keys::session_state_key("g", &stale_id);
    let mut state = read_state(&storage, "g", &stale_id);
    state.last_heartbeat -= 60_000;
    storage
        .put(key.as_bytes(), &serde_json::to_vec(&state).unwrap())
        .unwrap();

    let fresh_id = manager.initialize("g").unwrap();

    let reclaimed = manager.cleanup_timeout_sessions("g", 30_000).unwrap();
    assert_eq!(reclaimed, 1);

    let stale = read_state(&storage, "g", &stale_id);
    assert_eq!(stale.status, SessionStatus::Terminated);
    // The reclaim stamp doubles as the final heartbeat.
    assert!(stale.last_heartbeat > state.last_heartbeat);

    let fresh = read_state(&storage, "g", &fresh_id);
    assert_eq!(fresh.status, SessionStatus::Active);

    // Nothing left to reclaim.
    assert_eq!(manager.cleanup_timeout_sessions("g", 30_000).unwrap(), 0);
}

#[test]
fn cleanup_ignores_other_groups() {
    let (storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();
    let key = keys::session_state_key("g", &session_id);
    let mut state = read_state(&storage, "g", &session_id);
    state.last_heartbeat -= 60_000;
    storage
        .put(key.as_bytes(), &serde_json::to_vec(&state).unwrap())
        .unwrap();

    assert_eq!(manager.cleanup_timeout_sessions("other", 30_000).unwrap(), 0);
    assert_eq!(read_state(&storage, "g", &session_id).status, SessionStatus::Active);
}

#[test]
fn heartbeat_worker_beats_current_group() {
    let (storage, manager) = setup();
    let session_id = manager.initialize("g").unwrap();
    let initial = read_state(&storage, "g", &session_id);

    manager.start_heartbeat(Duration::from_millis(10));
    manager.start_heartbeat(Duration::from_millis(10)); // idempotent
    std::thread::sleep(Duration::from_millis(100));
    manager.stop_heartbeat();

    let beaten = read_state(&storage, "g", &session_id);
    assert!(beaten.last_heartbeat > initial.last_heartbeat);

    // Worker is stopped: the record no longer moves.
    let frozen = read_state(&storage, "g", &session_id);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        read_state(&storage, "g", &session_id).last_heartbeat,
        frozen.last_heartbeat
    );

    // Stopping again is a no-op.
    manager.stop_heartbeat();
}

#[test]
fn heartbeat_worker_survives_terminated_session() {
    let (_storage, manager) = setup();
    manager.initialize("g").unwrap();
    manager.start_heartbeat(Duration::from_millis(10));
    manager.terminate("g");
    // Worker keeps polling without a current group and stays healthy.
    std::thread::sleep(Duration::from_millis(50));
    manager.stop_heartbeat();
}
