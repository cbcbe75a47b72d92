//! JSON wire payloads: handshake, manifest, errors.
//! These map directly to JSON bodies inside frames.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client → server greeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u8,
    /// The 4-letter rendezvous code of the advertisement being contacted.
    pub code: String,
    /// 16-byte client nonce, hex-encoded.
    pub client_nonce: String,
}

/// Server → client reply to HELLO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAck {
    /// 16-byte server nonce, hex-encoded.
    pub server_nonce: String,
    pub box_name: String,
    /// Public advertisements skip the AUTH frame entirely.
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReq {
    pub file_id: Uuid,
    pub version_id: Uuid,
}

/// One file in the LIST_RESP manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_id: Uuid,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub current: VersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version_id: Uuid,
    /// Plaintext size in bytes.
    pub size: u64,
    pub mime: String,
    /// Hex SHA-256 of the plaintext — the client verifies downloads
    /// against this.
    pub sha256: String,
}

/// Error taxonomy on the wire. Mirrors the engine-side error kinds so a
/// peer failure is as distinguishable as a local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AuthFailure,
    Locked,
    IntegrityFailure,
    Io,
    ProtocolError,
    Timeout,
    Cancelled,
    Conflict,
    QuotaExceeded,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorCode::AuthFailure).unwrap();
        assert_eq!(json, "\"auth_failure\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::AuthFailure);
    }

    #[test]
    fn manifest_entry_roundtrips() {
        let entry = ManifestEntry {
            file_id: Uuid::new_v4(),
            name: "r.txt".into(),
            description: "round trip".into(),
            tags: vec!["test".into()],
            current: VersionInfo {
                version_id: Uuid::new_v4(),
                size: 5,
                mime: "text/plain".into(),
                sha256: "ab".repeat(32),
            },
        };
        let json = serde_json::to_vec(&entry).unwrap();
        let back: ManifestEntry = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.file_id, entry.file_id);
        assert_eq!(back.current.sha256, entry.current.sha256);
    }
}
