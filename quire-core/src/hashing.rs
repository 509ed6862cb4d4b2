//! Content digests.
//!
//! [`content_hash`] is what a [`PublishRecord`](crate::types::PublishRecord)
//! stores; status classification recomputes it over the current bytes, so
//! the two must always use this one function. [`blob_version`] is the
//! object version the bundled remotes hand out.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the raw bytes. No normalisation is applied.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Git-style blob digest: SHA-256 over `"blob <len>\0"` followed by the bytes.
pub fn blob_version(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
