//! sb_engine — session management and the box engine
//!
//! The single write path of ShadowBox. `BoxEngine` ties together the
//! metadata index, the blob store and the session manager:
//! ingest → hash → encrypt → store → record, all within one transaction.
//!
//! # Modules
//! - `session` — per-box unlocked-DEK cache with auto-lock
//! - `engine`  — create/add/read/version/restore/search/delete
//! - `config`  — the single config struct the core consumes
//! - `error`   — engine error taxonomy

pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use config::Config;
pub use engine::{BoxEngine, FileEntry};
pub use error::EngineError;
pub use session::{spawn_auto_lock, AutoLockHandle, SessionManager};
