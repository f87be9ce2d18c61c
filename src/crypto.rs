//! Hashing helpers: SHA-256 digests for blocks and stored payloads.

use sha2::{Digest, Sha256};

/// Hash inputs (concatenate as bytes, SHA-256) and return lowercase hex.
///
/// Concatenation is not self-delimiting; callers hashing variable-length
/// fields should go through [`canonical_digest`] instead.
pub fn hash_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 over a length-prefixed encoding of `fields`.
///
/// Each field is written as its byte length (u64, little endian) followed by
/// its bytes, so `("ab", "c")` and `("a", "bc")` never collide.
pub fn canonical_digest(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for f in fields {
        hasher.update((f.len() as u64).to_le_bytes());
        hasher.update(f);
    }
    hex::encode(hasher.finalize())
}

/// Content digest of an opaque payload, as used by the in-memory content store.
pub fn content_digest(bytes: &[u8]) -> String {
    hash_concat(&[bytes])
}
