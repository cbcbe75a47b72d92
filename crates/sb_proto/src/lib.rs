//! sb_proto — wire types and framing for the ShadowBox share protocol
//!
//! Protocol version 1. One TCP connection, framed as
//! `| u32 length | u8 type | payload |` (big-endian, 16 MiB cap).
//!
//! Control payloads (HELLO, HELLO_ACK, GET_REQ, LIST_RESP, ERROR) are JSON.
//! AUTH carries a raw 32-byte HMAC proof. GET_CHUNK carries a fixed binary
//! header (two UUIDs + offset) followed by raw file bytes so content is
//! never base64-inflated.
//!
//! # Modules
//! - `frame`    — frame enum, codec, async read/write
//! - `manifest` — LIST_RESP manifest types and wire error codes

pub mod frame;
pub mod manifest;

pub use frame::{read_frame, write_frame, Chunk, Frame, ProtoError, MAX_CHUNK, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use manifest::{ErrorCode, ErrorFrame, GetReq, Hello, HelloAck, ManifestEntry, VersionInfo};
