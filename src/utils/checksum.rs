//! Artifact integrity digests.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an artifact payload, recorded in job stats so
/// downstream consumers can detect modified artifacts.
pub fn sha256_hex(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
