//! BLAKE3 content hashing, encapsulated behind a plain `String` hex output so
//! the algorithm can change without touching call sites elsewhere in the
//! workspace.

use crate::hashing::to_canonical_json;
use blake3::Hasher;
use serde_json::Value;

pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Hashes a JSON value after canonicalizing it, so two semantically equal
/// values with differently-ordered object keys hash identically.
pub fn hash_value(v: &Value) -> String {
    let canonical = to_canonical_json(v);
    hash_str(&canonical)
}
