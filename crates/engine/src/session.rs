//! Session lifecycle and heartbeat.
//!
//! Every producer/consumer instance owns one session per group, identified
//! by a ULID. The session record is written once on initialization and then
//! only touched by heartbeats and termination; it is never deleted, so the
//! store keeps a history of past sessions. A single worker thread refreshes
//! the heartbeat of the most recently initialized group; peers use
//! [`SessionManager::cleanup_timeout_sessions`] to reclaim sessions whose
//! heartbeats stopped.

use parking_lot::{Condvar, Mutex};
use stashq_core::types::{SessionState, SessionStatus};
use stashq_core::{keys, ulid, Error, Result};
use stashq_storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default wake interval of the heartbeat worker.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Issues sessions per group and keeps their heartbeats fresh.
pub struct SessionManager {
    inner: Arc<SessionInner>,
    worker: Mutex<Option<HeartbeatWorker>>,
}

struct SessionInner {
    storage: Arc<dyn Storage>,
    table: Mutex<SessionTable>,
}

#[derive(Default)]
struct SessionTable {
    /// Group -> session id for sessions issued by this instance.
    sessions: HashMap<String, String>,
    /// The group the heartbeat worker refreshes.
    current_group: Option<String>,
}

struct HeartbeatWorker {
    handle: JoinHandle<()>,
    signal: Arc<StopSignal>,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl SessionManager {
    /// Create a manager over a shared store handle.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                storage,
                table: Mutex::new(SessionTable::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start a new session for `group` and persist its state record.
    ///
    /// The new session becomes the heartbeat worker's current group. Returns
    /// the session id.
    pub fn initialize(&self, group: &str) -> Result<String> {
        let mut table = self.inner.table.lock();
        let session_id = ulid::generate();
        let now = ulid::now_ms() as i64;
        let state = SessionState {
            session_id: session_id.clone(),
            process_id: std::process::id() as i64,
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
        };
        let key = keys::session_state_key(group, &session_id);
        let value = serde_json::to_vec(&state)?;
        self.inner
            .storage
            .put(key.as_bytes(), &value)
            .map_err(|e| Error::SessionInit(format!("{group}: {e}")))?;
        table.sessions.insert(group.to_string(), session_id.clone());
        table.current_group = Some(group.to_string());
        tracing::info!(group, session = %session_id, "session initialized");
        Ok(session_id)
    }

    /// End `group`'s session.
    ///
    /// Rewrites the state record as terminated with a final heartbeat.
    /// Best-effort: storage failures are logged, not surfaced, and the group
    /// is forgotten either way, so later heartbeats for it are no-ops.
    pub fn terminate(&self, group: &str) {
        let mut table = self.inner.table.lock();
        let Some(session_id) = table.sessions.remove(group) else {
            return;
        };
        if table.current_group.as_deref() == Some(group) {
            table.current_group = None;
        }
        let key = keys::session_state_key(group, &session_id);
        match self.inner.storage.get(key.as_bytes()) {
            Ok(Some(raw)) => {
                if let Ok(mut state) = serde_json::from_slice::<SessionState>(&raw) {
                    state.status = SessionStatus::Terminated;
                    state.last_heartbeat = ulid::now_ms() as i64;
                    match serde_json::to_vec(&state) {
                        Ok(value) => {
                            if let Err(e) = self.inner.storage.put(key.as_bytes(), &value) {
                                tracing::warn!(group, error = %e, "failed to persist session termination");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(group, error = %e, "failed to encode terminated session")
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(group, error = %e, "failed to read session record"),
        }
        tracing::info!(group, session = %session_id, "session terminated");
    }

    /// The session id this instance holds for `group`, if any.
    pub fn session_id(&self, group: &str) -> Option<String> {
        self.inner.table.lock().sessions.get(group).cloned()
    }

    /// Refresh `group`'s session heartbeat to now.
    ///
    /// Fails with [`Error::SessionNotFound`] if this instance holds no
    /// session for the group or the state record is gone.
    pub fn update_heartbeat(&self, group: &str) -> Result<()> {
        self.inner.update_heartbeat(group)
    }

    /// Check whether the persisted record of `session_id` is still active.
    ///
    /// A missing or unreadable record counts as inactive.
    pub fn is_session_active(&self, group: &str, session_id: &str) -> Result<bool> {
        let key = keys::session_state_key(group, session_id);
        let Some(raw) = self.inner.storage.get(key.as_bytes())? else {
            return Ok(false);
        };
        let Ok(state) = serde_json::from_slice::<SessionState>(&raw) else {
            return Ok(false);
        };
        Ok(state.status == SessionStatus::Active)
    }

    /// Mark every active session of `group` whose heartbeat is older than
    /// `timeout_ms` as terminated. Returns the number reclaimed.
    ///
    /// The rewrite stamps `last_heartbeat` with now, which doubles as the
    /// reclaim timestamp.
    pub fn cleanup_timeout_sessions(&self, group: &str, timeout_ms: i64) -> Result<usize> {
        let _table = self.inner.table.lock();
        let prefix = keys::group_prefix(group);
        let entries = self.inner.storage.scan_prefix(prefix.as_bytes())?;
        let now = ulid::now_ms() as i64;
        let mut reclaimed = 0;
        for (key, value) in entries {
            if !keys::is_session_state_key(&key) {
                continue;
            }
            let Ok(mut state) = serde_json::from_slice::<SessionState>(&value) else {
                continue;
            };
            if state.status != SessionStatus::Active {
                continue;
            }
            if now - state.last_heartbeat <= timeout_ms {
                continue;
            }
            state.status = SessionStatus::Terminated;
            state.last_heartbeat = now;
            self.inner.storage.put(&key, &serde_json::to_vec(&state)?)?;
            reclaimed += 1;
        }
        if reclaimed > 0 {
            tracing::info!(group, reclaimed, "reclaimed timed-out sessions");
        }
        Ok(reclaimed)
    }

    /// Start the heartbeat worker. Idempotent; a running worker is kept.
    pub fn start_heartbeat(&self, interval: Duration) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let signal = Arc::new(StopSignal::default());
        let inner = Arc::clone(&self.inner);
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::spawn(move || heartbeat_loop(inner, thread_signal, interval));
        *worker = Some(HeartbeatWorker { handle, signal });
    }

    /// Stop the heartbeat worker and wait for it to exit.
    pub fn stop_heartbeat(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        *worker.signal.stopped.lock() = true;
        worker.signal.wake.notify_all();
        if worker.handle.join().is_err() {
            tracing::warn!("heartbeat worker panicked");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

impl SessionInner {
    fn update_heartbeat(&self, group: &str) -> Result<()> {
        let session_id = self
            .table
            .lock()
            .sessions
            .get(group)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(group.to_string()))?;
        let key = keys::session_state_key(group, &session_id);
        let raw = self
            .storage
            .get(key.as_bytes())?
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        let mut state: SessionState = serde_json::from_slice(&raw)?;
        state.last_heartbeat = ulid::now_ms() as i64;
        self.storage.put(key.as_bytes(), &serde_json::to_vec(&state)?)?;
        Ok(())
    }
}

fn heartbeat_loop(inner: Arc<SessionInner>, signal: Arc<StopSignal>, interval: Duration) {
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                let _ = signal.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                break;
            }
        }
        let group = inner.table.lock().current_group.clone();
        let Some(group) = group else { continue };
        match inner.update_heartbeat(&group) {
            Ok(()) => {}
            // Session terminated between the wake and the beat.
            Err(Error::SessionNotFound(_)) => {}
            Err(e) => tracing::warn!(group = %group, error = %e, "heartbeat update failed"),
        }
    }
}
