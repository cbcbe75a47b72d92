//! sb_net — LAN sharing for ShadowBox
//!
//! Three pieces:
//! - `discovery` — mDNS advertisement and browsing of
//!   `_shadowbox<CODE>._tcp.local.` services
//! - `server`   — the read-only share server (one box per advertisement)
//! - `client`   — the pull client (resolve → handshake → list → download)
//!
//! The server streams PLAINTEXT decrypted through the host's session; the
//! receiving side re-encrypts under its own box DEK. Nothing derived from
//! the rendezvous code is ever persisted on either side.

pub mod client;
pub mod discovery;
pub mod error;
pub mod server;

pub use client::{pull, pull_from, PullOptions};
pub use discovery::{Discovery, DiscoveryEvent, ShareInfo};
pub use error::NetError;
pub use server::{ShareServer, ShareServerConfig};
