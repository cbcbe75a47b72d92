//! Database row models — these map to/from SQL rows.
//!
//! IDs are stored as TEXT (UUID strings); the engine parses them at its
//! boundary. Entities are value records keyed by ID — no in-memory object
//! graph between boxes, files and versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BoxRow {
    pub box_id: String,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub is_public: bool,
    /// 16-byte Argon2id salt for master-key derivation.
    pub kdf_salt: Vec<u8>,
    /// Per-box DEK, AEAD-encrypted under the owner's wrap key.
    /// A box whose wrapped DEK is lost is irrecoverable.
    pub wrapped_dek: Vec<u8>,
    pub soft_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRow {
    pub file_id: String,
    pub box_id: String,
    pub name: String,
    pub description: String,
    pub current_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub soft_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VersionRow {
    pub version_id: String,
    pub file_id: String,
    /// Hex SHA-256 of the PLAINTEXT content.
    pub blob_hash: String,
    /// Plaintext size in bytes.
    pub size: i64,
    pub mime: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic per file, starting at 1, no gaps.
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlobRow {
    pub blob_hash: String,
    pub box_id: String,
    /// Number of versions (live or soft-deleted) referencing this blob.
    pub ref_count: i64,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
    pub ct_size: i64,
    pub path_on_disk: String,
}

/// Aggregate returned by `box_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxStats {
    pub file_count: i64,
    pub total_size: i64,
}
