//! SHA-256 hashing over canonical bytes, with the fixed domain prefixes that
//! keep the different commitment layers from colliding.
//!
//! Every digest in this workspace is the lowercase hex encoding of a SHA-256
//! output: 64 characters, no prefix.

use crate::canonical::{canonicalize, CanonError};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Domain prefix for event hashes.
pub const EVENT_DOMAIN: &[u8] = b"poi-trace:event:v1|";
/// Domain prefix for rolling-hash chain steps.
pub const ROLL_DOMAIN: &[u8] = b"poi-trace:roll:v1|";
/// Domain prefix for span hashes.
pub const SPAN_DOMAIN: &[u8] = b"poi-trace:span:v1|";
/// Domain prefix for Merkle leaf hashes.
pub const LEAF_DOMAIN: &[u8] = b"poi-trace:leaf:v1|";
/// Domain prefix for Merkle internal-node hashes.
pub const NODE_DOMAIN: &[u8] = b"poi-trace:node:v1|";
/// Domain prefix for the chunk manifest hash.
pub const MANIFEST_DOMAIN: &[u8] = b"poi-trace:manifest:v1|";
/// Domain prefix for the bundle root hash.
pub const ROOT_DOMAIN: &[u8] = b"poi-trace:root:v1|";
/// Domain prefix for the signed bundle payload.
pub const SIG_DOMAIN: &[u8] = b"poi-trace:sig:v1|";

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hash raw bytes to a lowercase hex digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonicalize a value and hash the resulting bytes.
pub fn hash_canonical(value: &Value) -> Result<String, CanonError> {
    Ok(hash_bytes(&canonicalize(value)?))
}

/// Hash a domain prefix followed by a sequence of byte parts.
pub fn hash_domain(domain: &[u8], parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
