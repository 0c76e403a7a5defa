//! Canonical JSON and content hashing. `to_canonical_json` gives deterministic
//! serialization (sorted object keys); `hash_str`/`hash_value` derive stable
//! BLAKE3 identifiers from it; `sha256_hex`/`script_cache_key` are the
//! separate SHA-256 path the script engines use for their compiled-artifact
//! LRU keys (§4.6).

pub mod canonical_json;
pub mod hash;
pub mod sha256;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};
pub use sha256::{script_cache_key, sha256_hex};
