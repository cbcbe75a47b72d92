//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM.  Key size: 32 bytes.  Nonce: 12 bytes (random).
//! Tag: 16 bytes.
//!
//! Blob ciphertexts keep the nonce and tag DETACHED — they live in the
//! metadata index, the blob file on disk holds only the ciphertext bytes.
//! Wrapped DEKs use the attached format `[ nonce (12) | ciphertext+tag ]`
//! since they are stored as a single column.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::Dek;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

fn cipher(key: &[u8; 32]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("bad AES key length".into()))
}

fn fresh_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext`, returning `(nonce, ciphertext, tag)` separately.
/// A fresh random nonce is drawn on every call — never reused under one key.
pub fn encrypt_detached(
    key: &[u8; 32],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let cipher = cipher(key)?;
    let nonce = fresh_nonce();

    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buf)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((nonce, buf, tag_bytes))
}

/// Decrypt a detached-format ciphertext. Fails with `AeadDecrypt` on any
/// tag mismatch (wrong key or tampering).
pub fn decrypt_detached(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = cipher(key)?;
    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buf,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(buf))
}

// ── DEK wrapping ──────────────────────────────────────────────────────────────

/// Encrypt a per-box DEK under a 32-byte wrap key.
/// Output format: `[ nonce (12) | ciphertext + tag ]`.
pub fn wrap_dek(wrap_key: &[u8; 32], dek: &Dek) -> Result<Vec<u8>, CryptoError> {
    let (nonce, ct, tag) = encrypt_detached(wrap_key, dek.as_bytes())?;
    let mut out = Vec::with_capacity(NONCE_LEN + ct.len() + TAG_LEN);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Decrypt a wrapped DEK. `AeadDecrypt` here means wrong password (wrong
/// master key) or a tampered box row.
pub fn unwrap_dek(wrap_key: &[u8; 32], wrapped: &[u8]) -> Result<Dek, CryptoError> {
    if wrapped.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, rest) = wrapped.split_at(NONCE_LEN);
    let (ct, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_bytes);

    let plaintext = decrypt_detached(wrap_key, &nonce, ct, &tag)?;
    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKey("unwrapped DEK wrong length".into()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&plaintext);
    Ok(Dek::from_bytes(key))
}
