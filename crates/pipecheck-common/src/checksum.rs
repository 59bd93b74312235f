//! SHA-256 helpers for whole-file content hashes and record fingerprints

use sha2::{Digest, Sha256};

/// Hash an in-memory buffer, returning lowercase hex
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}
