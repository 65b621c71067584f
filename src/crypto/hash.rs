//! Integrity hash over serialized snapshot bytes.
//!
//! `hash = hex(SHA-256(user_id || 0x00 || payload))`. Salting with the user id
//! means a blob copied between accounts never verifies.

use sha2::{Digest, Sha256};

/// Compute the integrity hash for `payload` owned by `user_id`.
pub fn integrity_hash(user_id: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0x00]);
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Check `payload` against a previously computed hash.
pub fn verify_integrity(user_id: &str, payload: &[u8], expected: &str) -> bool {
    integrity_hash(user_id, payload).eq_ignore_ascii_case(expected)
}
