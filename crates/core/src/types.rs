//! Persisted record types and their JSON encoding.
//!
//! Two record kinds live in the store: batch metadata and session state.
//! Field names and status strings are part of the on-disk format; storage
//! written by one implementation must parse in another, so the serde shapes
//! here are fixed.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a batch.
///
/// A batch is created `Pending`, becomes `Loaded` exactly once, and is
/// deleted on acknowledgment. `Acknowledged` is never persisted by this
/// implementation (acknowledging removes the record); the variant exists so
/// records written by other producers still parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Created, not yet delivered to a consumer.
    Pending,
    /// Delivered once; never delivered again.
    Loaded,
    /// Transient pre-delete marker, never observed persisted.
    Acknowledged,
}

/// Lifecycle state of a producer/consumer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is live and heartbeating.
    Active,
    /// Session ended, either explicitly or reclaimed after timeout.
    Terminated,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Metadata record for one batch.
///
/// `sequence_start` and `sequence_end` are inclusive. `loaded_at` is zero
/// while the batch is pending and is omitted from the JSON encoding in that
/// case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    /// ULID of the batch.
    pub batch_id: String,
    /// First sequence id covered by this batch (inclusive).
    pub sequence_start: i64,
    /// Last sequence id covered by this batch (inclusive).
    pub sequence_end: i64,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Load time, unix milliseconds; zero iff still pending.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub loaded_at: i64,
}

impl BatchMetadata {
    /// Check whether `sequence_id` falls inside this batch's range.
    pub fn contains(&self, sequence_id: i64) -> bool {
        self.sequence_start <= sequence_id && sequence_id <= self.sequence_end
    }
}

/// State record for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// ULID of the session.
    pub session_id: String,
    /// OS process id of the owning instance.
    pub process_id: i64,
    /// Session start time, unix milliseconds.
    pub started_at: i64,
    /// Last heartbeat time, unix milliseconds.
    pub last_heartbeat: i64,
    /// Current lifecycle state.
    pub status: SessionStatus,
}
