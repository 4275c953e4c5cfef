//! Lexicographically sortable identifiers with an embedded timestamp.
//!
//! 26 characters of Crockford base32: the first 10 encode a 48-bit unix
//! millisecond timestamp (high-order first), the remaining 16 encode 80 bits
//! of randomness. Ids generated in increasing real time sort
//! lexicographically non-decreasing across millisecond boundaries; within a
//! single millisecond the random suffix decides and nothing here relies on
//! that order.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Total id length in characters.
pub const ULID_LEN: usize = 26;

/// Characters encoding the timestamp.
pub const TIMESTAMP_LEN: usize = 10;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate an id stamped with the current time.
pub fn generate() -> String {
    generate_at(now_ms())
}

/// Generate an id stamped with `timestamp_ms` (truncated to 48 bits).
pub fn generate_at(timestamp_ms: u64) -> String {
    let mut id = String::with_capacity(ULID_LEN);
    let mut ts = timestamp_ms & 0xFFFF_FFFF_FFFF;
    let mut time_part = [0u8; TIMESTAMP_LEN];
    for slot in time_part.iter_mut().rev() {
        *slot = ALPHABET[(ts & 0x1F) as usize];
        ts >>= 5;
    }
    for b in time_part {
        id.push(char::from(b));
    }
    let mut rng = rand::thread_rng();
    for _ in TIMESTAMP_LEN..ULID_LEN {
        id.push(char::from(ALPHABET[rng.gen_range(0..32)]));
    }
    id
}

/// Extract the embedded millisecond timestamp, or `None` for malformed input.
pub fn extract_timestamp(id: &str) -> Option<u64> {
    if !is_valid(id) {
        return None;
    }
    let mut ts = 0u64;
    for b in id.bytes().take(TIMESTAMP_LEN) {
        ts = (ts << 5) | decode_char(b)?;
    }
    Some(ts)
}

/// Check length and alphabet membership.
pub fn is_valid(id: &str) -> bool {
    id.len() == ULID_LEN && id.bytes().all(|b| decode_char(b).is_some())
}

fn decode_char(c: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        let id = generate();
        assert_eq!(id.len(), ULID_LEN);
        assert!(is_valid(&id));
    }

    #[test]
    fn timestamp_roundtrip() {
        let ts = now_ms();
        assert_eq!(extract_timestamp(&generate_at(ts)), Some(ts));
        assert_eq!(extract_timestamp(&generate_at(1_234_567_890)), Some(1_234_567_890));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(!is_valid(""));
        assert!(!is_valid("invalid"));
        assert!(!is_valid("01ARZ3NDEKTSV4RRFFQ69G5FA")); // 25 chars
        assert!(!is_valid("01ARZ3NDEKTSV4RRFFQ69G5FAUU")); // 27 chars
        assert!(!is_valid("01ARZ3NDEKTSV4RRFFQ69G5FAL")); // 'L' not in alphabet
        assert_eq!(extract_timestamp("invalid"), None);
    }

    #[test]
    fn later_millisecond_sorts_greater() {
        let earlier = generate_at(1_000);
        let later = generate_at(2_000);
        assert!(earlier < later);

        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(generate());
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn distinct_within_one_millisecond() {
        let ts = now_ms();
        let a = generate_at(ts);
        let b = generate_at(ts);
        assert_ne!(a, b);
        assert_eq!(a[..TIMESTAMP_LEN], b[..TIMESTAMP_LEN]);
    }
}
