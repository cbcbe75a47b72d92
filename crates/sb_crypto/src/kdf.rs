//! Key derivation functions
//!
//! `derive_master_key` — Argon2id, derives the 32-byte master key from a
//!   password + per-box salt.
//!
//! `hkdf_expand` — HKDF-SHA256, used for the DEK wrap key and the wire key.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// HKDF info string for the key that wraps per-box DEKs.
pub const INFO_DEK_WRAP: &[u8] = b"dek-wrap";
/// HKDF info string for the share-session wire key.
pub const INFO_WIRE_V1: &[u8] = b"wire-v1";

// ── Master key (Argon2id) ─────────────────────────────────────────────────────

/// 32-byte master key derived from the owner's password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey(pub(crate) [u8; 32]);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Per-box data-encryption key. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Dek(pub(crate) [u8; 32]);

impl Dek {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Argon2id parameters — interactive-use tuning, matching the box format.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 iterations
        1,         // p_cost: 1 thread
        Some(32),  // output len
    )
    .expect("static Argon2 params are always valid")
}

/// Derive the master key from a password + 16-byte salt.
/// The salt is stored in the box row (not secret).
pub fn derive_master_key(password: &[u8], salt: &[u8; 16]) -> Result<MasterKey, CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(MasterKey(output))
}

/// Generate a fresh random 16-byte KDF salt (once per box; stored in DB).
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a fresh random per-box DEK (once per box; stored wrapped).
pub fn generate_dek() -> Dek {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    Dek(key)
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the 32-byte sub-key that wraps DEKs, from the master key.
pub fn wrap_subkey(master: &MasterKey) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    hkdf_expand(master.as_bytes(), None, INFO_DEK_WRAP, &mut key)?;
    Ok(key)
}

/// Derive the share-session wire key from a rendezvous code and the two
/// handshake nonces. Both peers compute the same key; it is never persisted.
pub fn wire_key(
    code: &str,
    client_nonce: &[u8; 16],
    server_nonce: &[u8; 16],
) -> Result<[u8; 32], CryptoError> {
    let mut salt = [0u8; 32];
    salt[..16].copy_from_slice(client_nonce);
    salt[16..].copy_from_slice(server_nonce);

    let mut key = [0u8; 32];
    hkdf_expand(code.as_bytes(), Some(&salt), INFO_WIRE_V1, &mut key)?;
    Ok(key)
}
