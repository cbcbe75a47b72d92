//! The share server.
//!
//! One instance serves exactly one box, read-only, to any number of
//! concurrent clients. Content is decrypted through the host's session
//! manager and streamed as plaintext — the wire format stays independent
//! of the owner's key hierarchy, and the box must be unlocked to serve.
//!
//! Connection state machine:
//! `HELLO → HELLO_ACK → [AUTH] → (LIST_REQ | GET_REQ)* → close`.
//! Every out-of-order or malformed frame earns an ERROR frame and a close;
//! the accept loop survives all per-connection failures.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sb_crypto::{auth, kdf};
use sb_engine::BoxEngine;
use sb_proto::frame::{read_frame, write_frame, Chunk, Frame, ProtoError};
use sb_proto::{ErrorCode, ErrorFrame, HelloAck, ManifestEntry, VersionInfo, MAX_CHUNK, PROTOCOL_VERSION};

use crate::error::NetError;

/// How long one frame may take to arrive before the connection is dropped.
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);
/// Uniform delay before every authentication rejection, so remote probing
/// cannot distinguish failure causes by timing.
const AUTH_REJECT_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct ShareServerConfig {
    pub box_id: Uuid,
    pub box_name: String,
    pub code: String,
    pub is_public: bool,
}

/// A running share server. Dropping the handle does NOT stop it; call
/// `shutdown` (or cancel the token passed to `bind`).
pub struct ShareServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ShareServer {
    /// Bind a listener (port 0 = ephemeral) and start accepting.
    pub async fn bind(
        engine: Arc<BoxEngine>,
        config: ShareServerConfig,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, box_id = %config.box_id, "share server listening");

        let handle = tokio::spawn(accept_loop(
            listener,
            engine,
            Arc::new(config),
            cancel.clone(),
        ));
        Ok(Self {
            local_addr,
            cancel,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<BoxEngine>,
    config: Arc<ShareServerConfig>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("share server accept loop shutting down");
                return;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let engine = engine.clone();
                let config = config.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    match handle_connection(stream, engine, config, conn_cancel).await {
                        Ok(()) => tracing::debug!(%peer, "connection closed"),
                        Err(e) => tracing::debug!(%peer, error = %e, "connection failed"),
                    }
                });
            }
        }
    }
}

/// Read one frame under the per-frame timeout, honoring cancellation.
async fn timed_read(
    reader: &mut OwnedReadHalf,
    cancel: &CancellationToken,
) -> Result<Frame, NetError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        result = tokio::time::timeout(FRAME_TIMEOUT, read_frame(reader)) => match result {
            Err(_) => Err(NetError::Timeout("frame read")),
            Ok(frame) => Ok(frame?),
        }
    }
}

/// Send an ERROR frame and surface the failure to the connection handler.
async fn reject(
    writer: &mut OwnedWriteHalf,
    code: ErrorCode,
    message: &str,
) -> Result<(), NetError> {
    let _ = write_frame(writer, &Frame::Error(ErrorFrame::new(code, message))).await;
    Err(match code {
        ErrorCode::AuthFailure => NetError::AuthFailure,
        _ => NetError::Protocol(message.to_string()),
    })
}

async fn handle_connection(
    stream: TcpStream,
    engine: Arc<BoxEngine>,
    config: Arc<ShareServerConfig>,
    cancel: CancellationToken,
) -> Result<(), NetError> {
    let (mut reader, mut writer) = stream.into_split();

    // ── HELLO ────────────────────────────────────────────────────────────────
    let hello = match timed_read(&mut reader, &cancel).await? {
        Frame::Hello(hello) => hello,
        _ => return reject(&mut writer, ErrorCode::ProtocolError, "expected HELLO").await,
    };
    if hello.protocol_version != PROTOCOL_VERSION {
        return reject(&mut writer, ErrorCode::ProtocolError, "unsupported protocol version").await;
    }
    let client_nonce: [u8; 16] = match hex::decode(&hello.client_nonce) {
        Ok(bytes) => match bytes.try_into() {
            Ok(nonce) => nonce,
            Err(_) => {
                return reject(&mut writer, ErrorCode::ProtocolError, "client nonce must be 16 bytes")
                    .await
            }
        },
        Err(_) => {
            return reject(&mut writer, ErrorCode::ProtocolError, "client nonce is not hex").await
        }
    };

    // A public box has no AUTH round, so the code in HELLO is its only
    // gate. Private boxes defer entirely to the HMAC proof — the rejection
    // is uniform either way.
    if config.is_public && hello.code != config.code {
        tokio::time::sleep(AUTH_REJECT_DELAY).await;
        return reject(&mut writer, ErrorCode::AuthFailure, "authentication failed").await;
    }

    let server_nonce = auth::generate_nonce();
    write_frame(
        &mut writer,
        &Frame::HelloAck(HelloAck {
            server_nonce: hex::encode(server_nonce),
            box_name: config.box_name.clone(),
            is_public: config.is_public,
        }),
    )
    .await?;

    // ── AUTH (private boxes only) ────────────────────────────────────────────
    if !config.is_public {
        let proof = match timed_read(&mut reader, &cancel).await? {
            Frame::Auth(proof) => proof,
            _ => return reject(&mut writer, ErrorCode::ProtocolError, "expected AUTH").await,
        };
        let wire_key = kdf::wire_key(&config.code, &client_nonce, &server_nonce)?;
        let expected = auth::auth_proof(&wire_key, &client_nonce, &server_nonce)?;
        if !auth::verify_proof(&expected, &proof) {
            tokio::time::sleep(AUTH_REJECT_DELAY).await;
            return reject(&mut writer, ErrorCode::AuthFailure, "authentication failed").await;
        }
    }

    // ── READY: serve LIST / GET until the peer hangs up ──────────────────────
    loop {
        let frame = match timed_read(&mut reader, &cancel).await {
            Ok(frame) => frame,
            Err(NetError::Proto(ProtoError::Closed)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match frame {
            Frame::ListReq => {
                let manifest = match build_manifest(&engine, config.box_id).await {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        let code = e.wire_code();
                        return reject(&mut writer, code, "listing failed").await;
                    }
                };
                write_frame(&mut writer, &Frame::ListResp(manifest)).await?;
            }
            Frame::GetReq(req) => {
                let bytes = match engine
                    .read_file(config.box_id, req.file_id, Some(req.version_id))
                    .await
                {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let code = NetError::Engine(e).wire_code();
                        return reject(&mut writer, code, "read failed").await;
                    }
                };
                stream_chunks(&mut writer, req.file_id, req.version_id, &bytes).await?;
            }
            _ => {
                return reject(&mut writer, ErrorCode::ProtocolError, "unexpected frame").await;
            }
        }
    }
}

/// Send the whole plaintext as ordered 1 MiB chunks, then the empty EOF
/// chunk.
async fn stream_chunks(
    writer: &mut OwnedWriteHalf,
    file_id: Uuid,
    version_id: Uuid,
    bytes: &[u8],
) -> Result<(), NetError> {
    let mut offset = 0usize;
    for piece in bytes.chunks(MAX_CHUNK) {
        write_frame(
            writer,
            &Frame::Chunk(Chunk {
                file_id,
                version_id,
                offset: offset as u64,
                data: piece.to_vec(),
            }),
        )
        .await?;
        offset += piece.len();
    }
    write_frame(
        writer,
        &Frame::Chunk(Chunk {
            file_id,
            version_id,
            offset: offset as u64,
            data: Vec::new(),
        }),
    )
    .await?;
    Ok(())
}

async fn build_manifest(
    engine: &BoxEngine,
    box_id: Uuid,
) -> Result<Vec<ManifestEntry>, NetError> {
    let entries = engine.list_files_with_current(box_id).await?;
    let mut manifest = Vec::with_capacity(entries.len());
    for entry in entries {
        let file_id = Uuid::parse_str(&entry.file.file_id)
            .map_err(|_| NetError::Protocol("malformed file id in index".into()))?;
        let version_id = Uuid::parse_str(&entry.current.version_id)
            .map_err(|_| NetError::Protocol("malformed version id in index".into()))?;
        manifest.push(ManifestEntry {
            file_id,
            name: entry.file.name,
            description: entry.file.description,
            tags: entry.tags,
            current: VersionInfo {
                version_id,
                size: entry.current.size as u64,
                mime: entry.current.mime,
                sha256: entry.current.blob_hash,
            },
        });
    }
    Ok(manifest)
}
