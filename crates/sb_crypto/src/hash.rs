//! SHA-256 content addressing.
//!
//! Blobs are keyed by the hex SHA-256 of their PLAINTEXT — dedup and
//! integrity checks both hang off this digest.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 (64 lowercase chars).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Raw SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
