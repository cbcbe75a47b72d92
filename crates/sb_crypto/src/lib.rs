//! sb_crypto — ShadowBox cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Keys are opaque newtypes so a DEK cannot be confused with a master key.
//!
//! # Module layout
//! - `kdf`   — Argon2id master key + HKDF-SHA256 sub-keys (DEK wrapping, wire key)
//! - `aead`  — AES-256-GCM encrypt/decrypt with detached nonce and tag
//! - `hash`  — SHA-256 content addressing
//! - `auth`  — HMAC-SHA256 transcript proof for share-session authentication
//! - `error` — unified error type

pub mod aead;
pub mod auth;
pub mod error;
pub mod hash;
pub mod kdf;

pub use error::CryptoError;
pub use kdf::{Dek, MasterKey};
