//! Key schema for the ordered store.
//!
//! Three key kinds share one namespace, all ASCII with `:`-separated fields:
//!
//! | Kind | Pattern |
//! |------|---------|
//! | Session state | `<group>:<session>:state` |
//! | Batch metadata | `<group>:<session>:batch:<batch_id>` |
//! | Payload | `<group>:<session>:<batch_id>:<seq20>` |
//!
//! `<seq20>` is the decimal sequence id zero-padded to 20 characters so that
//! byte order of payload keys equals numeric order of sequence ids within a
//! `(group, session, batch)` triple. Range scans over the store therefore
//! return payloads in FIFO order.

/// Width of the zero-padded sequence id in payload keys.
pub const SEQ_WIDTH: usize = 20;

/// Prefix covering every key of a group.
pub fn group_prefix(group: &str) -> String {
    format!("{group}:")
}

/// Key of a session's state record.
pub fn session_state_key(group: &str, session: &str) -> String {
    format!("{group}:{session}:state")
}

/// Check whether a raw store key is a session state key.
pub fn is_session_state_key(key: &[u8]) -> bool {
    key.ends_with(b":state")
}

/// Prefix covering every batch metadata record of a session.
pub fn batch_meta_prefix(group: &str, session: &str) -> String {
    format!("{group}:{session}:batch:")
}

/// Key of one batch's metadata record.
pub fn batch_meta_key(group: &str, session: &str, batch_id: &str) -> String {
    format!("{group}:{session}:batch:{batch_id}")
}

/// Key of one payload.
pub fn payload_key(group: &str, session: &str, batch_id: &str, sequence_id: i64) -> String {
    format!("{group}:{session}:{batch_id}:{sequence_id:0width$}", width = SEQ_WIDTH)
}

/// Every payload key of `[sequence_start, sequence_end]`, ascending.
pub fn payload_keys(
    group: &str,
    session: &str,
    batch_id: &str,
    sequence_start: i64,
    sequence_end: i64,
) -> Vec<String> {
    (sequence_start..=sequence_end)
        .map(|seq| payload_key(group, session, batch_id, seq))
        .collect()
}
