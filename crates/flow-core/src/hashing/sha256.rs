//! SHA-256 helper, used specifically for script compiled-artifact cache keys
//! (`sha256(source || sorted arg names)`), kept separate from the BLAKE3
//! content hashing used for fingerprints elsewhere in this crate: the two
//! algorithms serve different audiences (an external, documented cache-key
//! format vs. an internal fingerprint we are free to evolve).

use sha2::{Digest, Sha256};

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `sha256(source || "\0" || sorted_arg_names.join(","))`, per the script
/// engine cache-key contract.
pub fn script_cache_key(source: &str, arg_names: &[String]) -> String {
    let mut sorted = arg_names.to_vec();
    sorted.sort();
    let joined = sorted.join(",");
    sha256_hex(&format!("{source}\u{0}{joined}"))
}
