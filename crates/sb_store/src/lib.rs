//! sb_store — metadata index and blob storage for ShadowBox
//!
//! Two halves, both owned exclusively by the box engine:
//! - `db`     — embedded SQLite metadata index (boxes, files, versions,
//!              blobs, tags) with sqlx migrations and an FTS5 search index.
//! - `blobs`  — content-addressed ciphertext files on disk, fanned out by
//!              hash prefix.
//!
//! The index never sees plaintext; blob files never carry their own nonce
//! or tag (those live in the `blobs` table).

pub mod blobs;
pub mod db;
pub mod error;
pub mod models;
pub mod search;

pub use blobs::BlobStore;
pub use db::Store;
pub use error::StoreError;
