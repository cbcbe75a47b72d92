//! Core configuration.
//!
//! Loading (env, file, CLI) belongs to the frontend; the core only accepts
//! this struct.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for ciphertext blob files.
    pub storage_root: PathBuf,
    /// Path of the metadata index database.
    pub db_path: PathBuf,
    /// Idle minutes before a box is auto-locked. 0 disables auto-lock.
    pub auto_lock_minutes: u64,
    /// Maximum plaintext size of a single file, in bytes.
    pub max_file_size: u64,
    /// TCP port for the share server. 0 = ephemeral.
    pub share_port: u16,
    /// Per-file timeout for pull downloads, in seconds.
    pub pull_file_timeout_secs: u64,
}

impl Config {
    pub fn new(storage_root: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            db_path: db_path.into(),
            auto_lock_minutes: 15,
            max_file_size: 100 * 1024 * 1024,
            share_port: 0,
            pull_file_timeout_secs: 600,
        }
    }
}
