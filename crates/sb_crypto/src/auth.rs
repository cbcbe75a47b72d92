//! Share-session authentication proof.
//!
//! Private boxes gate LIST/GET behind a transcript MAC: the client proves
//! knowledge of the rendezvous code by sending
//! `HMAC-SHA256(wire_key, client_nonce || server_nonce)`.
//! The wire key itself is HKDF-derived from the code and both nonces
//! (see `kdf::wire_key`), so a replayed proof is useless across sessions.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

pub const PROOF_LEN: usize = 32;

/// Compute the 32-byte auth proof over the handshake transcript.
pub fn auth_proof(
    wire_key: &[u8; 32],
    client_nonce: &[u8; 16],
    server_nonce: &[u8; 16],
) -> Result<[u8; PROOF_LEN], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(wire_key)
        .map_err(|_| CryptoError::InvalidKey("bad HMAC key length".into()))?;
    mac.update(client_nonce);
    mac.update(server_nonce);

    let mut out = [0u8; PROOF_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time proof verification.
pub fn verify_proof(expected: &[u8; PROOF_LEN], received: &[u8]) -> bool {
    if received.len() != PROOF_LEN {
        return false;
    }
    expected[..].ct_eq(received).into()
}

/// Generate a fresh 16-byte handshake nonce.
pub fn generate_nonce() -> [u8; 16] {
    use rand::RngCore;
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
