//! The pull client.
//!
//! `pull` resolves a rendezvous code via mDNS and then runs the share
//! protocol against the resolved endpoint; `pull_from` skips discovery and
//! talks to an explicit address (also what the tests drive).
//!
//! Downloads are verified against the manifest's SHA-256 before anything is
//! written locally, and the receiving box re-encrypts under its own DEK —
//! nothing from the wire session is persisted. The first failure aborts
//! the whole pull; no partial file rows are left behind.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sb_crypto::{auth, hash, kdf};
use sb_engine::BoxEngine;
use sb_proto::frame::{read_frame, write_frame, Frame};
use sb_proto::{GetReq, Hello, ManifestEntry, PROTOCOL_VERSION};

use crate::discovery::{Discovery, RESOLVE_TIMEOUT};
use crate::error::NetError;

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub connect_timeout: Duration,
    /// Ceiling on one file's complete download.
    pub per_file_timeout: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            per_file_timeout: Duration::from_secs(600),
        }
    }
}

/// Timeout for individual control-frame exchanges (handshake, listing).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve `code` on the LAN and pull the selected files into a local box.
/// `selection` filters by file name; `None` pulls everything.
pub async fn pull(
    discovery: &Discovery,
    engine: &BoxEngine,
    code: &str,
    into_box: Uuid,
    selection: Option<&[String]>,
    options: &PullOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Uuid>, NetError> {
    let (addr, _info) = discovery.resolve(code, RESOLVE_TIMEOUT).await?;
    pull_from(addr, engine, code, into_box, selection, options, cancel).await
}

/// Pull from an already-known endpoint.
pub async fn pull_from(
    addr: SocketAddr,
    engine: &BoxEngine,
    code: &str,
    into_box: Uuid,
    selection: Option<&[String]>,
    options: &PullOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Uuid>, NetError> {
    let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::Timeout("tcp connect"))??;
    let (mut reader, mut writer) = stream.into_split();

    // ── HELLO / HELLO_ACK ────────────────────────────────────────────────────
    let client_nonce = auth::generate_nonce();
    write_frame(
        &mut writer,
        &Frame::Hello(Hello {
            protocol_version: PROTOCOL_VERSION,
            code: code.to_string(),
            client_nonce: hex::encode(client_nonce),
        }),
    )
    .await?;

    let ack = match control_read(&mut reader, cancel).await? {
        Frame::HelloAck(ack) => ack,
        Frame::Error(e) => return Err(NetError::from_remote(e)),
        _ => return Err(NetError::Protocol("expected HELLO_ACK".into())),
    };
    let server_nonce: [u8; 16] = hex::decode(&ack.server_nonce)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| NetError::Protocol("bad server nonce".into()))?;

    // ── AUTH (private shares) ────────────────────────────────────────────────
    if !ack.is_public {
        let wire_key = kdf::wire_key(code, &client_nonce, &server_nonce)?;
        let proof = auth::auth_proof(&wire_key, &client_nonce, &server_nonce)?;
        write_frame(&mut writer, &Frame::Auth(proof.to_vec())).await?;
    }

    // ── LIST ─────────────────────────────────────────────────────────────────
    write_frame(&mut writer, &Frame::ListReq).await?;
    let manifest = match control_read(&mut reader, cancel).await? {
        Frame::ListResp(manifest) => manifest,
        Frame::Error(e) => return Err(NetError::from_remote(e)),
        _ => return Err(NetError::Protocol("expected LIST_RESP".into())),
    };

    let selected: Vec<&ManifestEntry> = match selection {
        Some(names) => manifest
            .iter()
            .filter(|entry| names.iter().any(|n| n == &entry.name))
            .collect(),
        None => manifest.iter().collect(),
    };

    // ── GET each selected file, verify, ingest locally ───────────────────────
    let mut pulled = Vec::with_capacity(selected.len());
    for entry in selected {
        if cancel.is_cancelled() {
            return Err(NetError::Cancelled);
        }
        let bytes = tokio::time::timeout(
            options.per_file_timeout,
            fetch_file(&mut reader, &mut writer, entry),
        )
        .await
        .map_err(|_| NetError::Timeout("file download"))??;

        if hash::sha256_hex(&bytes) != entry.current.sha256 {
            return Err(NetError::IntegrityFailure(format!(
                "downloaded {} does not match its manifest hash",
                entry.name
            )));
        }

        let file_id = engine
            .add_file(
                into_box,
                &entry.name,
                &bytes,
                &entry.current.mime,
                &entry.description,
                &entry.tags,
                cancel,
            )
            .await?;
        tracing::debug!(name = %entry.name, size = bytes.len(), "file pulled");
        pulled.push(file_id);
    }
    Ok(pulled)
}

async fn control_read(
    reader: &mut OwnedReadHalf,
    cancel: &CancellationToken,
) -> Result<Frame, NetError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        result = tokio::time::timeout(CONTROL_TIMEOUT, read_frame(reader)) => match result {
            Err(_) => Err(NetError::Timeout("frame read")),
            Ok(frame) => Ok(frame?),
        }
    }
}

/// Request one file and accumulate its ordered chunks until EOF.
async fn fetch_file(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    entry: &ManifestEntry,
) -> Result<Vec<u8>, NetError> {
    write_frame(
        writer,
        &Frame::GetReq(GetReq {
            file_id: entry.file_id,
            version_id: entry.current.version_id,
        }),
    )
    .await?;

    let mut buf = Vec::with_capacity(entry.current.size as usize);
    loop {
        match read_frame(reader).await? {
            Frame::Chunk(chunk) => {
                if chunk.file_id != entry.file_id || chunk.version_id != entry.current.version_id {
                    return Err(NetError::Protocol("chunk for a different file".into()));
                }
                if chunk.data.is_empty() {
                    break; // EOF marker
                }
                if chunk.offset != buf.len() as u64 {
                    return Err(NetError::Protocol("chunk out of order".into()));
                }
                buf.extend_from_slice(&chunk.data);
            }
            Frame::Error(e) => return Err(NetError::from_remote(e)),
            _ => return Err(NetError::Protocol("expected GET_CHUNK".into())),
        }
    }
    Ok(buf)
}
