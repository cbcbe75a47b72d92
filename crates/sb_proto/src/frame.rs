//! Frame codec.
//!
//! `| u32 length | u8 type | length bytes payload |`, all integers
//! big-endian. The length covers the payload only. Any frame over 16 MiB,
//! any unknown type byte, and any undecodable payload is a protocol error —
//! peers respond with an ERROR frame and close.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::manifest::{ErrorFrame, GetReq, Hello, HelloAck, ManifestEntry};

pub const PROTOCOL_VERSION: u8 = 1;
/// Hard cap on a single frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// File content is chunked at 1 MiB.
pub const MAX_CHUNK: usize = 1024 * 1024;

const TYPE_HELLO: u8 = 0x01;
const TYPE_HELLO_ACK: u8 = 0x02;
const TYPE_AUTH: u8 = 0x03;
const TYPE_LIST_REQ: u8 = 0x04;
const TYPE_LIST_RESP: u8 = 0x05;
const TYPE_GET_REQ: u8 = 0x06;
const TYPE_GET_CHUNK: u8 = 0x07;
const TYPE_ERROR: u8 = 0x7F;

/// A GET_CHUNK frame: fixed 40-byte binary header, then raw content.
/// An empty `data` signals end of file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub file_id: Uuid,
    pub version_id: Uuid,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Frame {
    Hello(Hello),
    HelloAck(HelloAck),
    /// Raw 32-byte HMAC proof (length validated by the verifier).
    Auth(Vec<u8>),
    ListReq,
    ListResp(Vec<ManifestEntry>),
    GetReq(GetReq),
    Chunk(Chunk),
    Error(ErrorFrame),
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame payload of {0} bytes exceeds the 16 MiB cap")]
    FrameTooLarge(u64),

    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Frame {
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Hello(_) => TYPE_HELLO,
            Frame::HelloAck(_) => TYPE_HELLO_ACK,
            Frame::Auth(_) => TYPE_AUTH,
            Frame::ListReq => TYPE_LIST_REQ,
            Frame::ListResp(_) => TYPE_LIST_RESP,
            Frame::GetReq(_) => TYPE_GET_REQ,
            Frame::Chunk(_) => TYPE_GET_CHUNK,
            Frame::Error(_) => TYPE_ERROR,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(match self {
            Frame::Hello(h) => serde_json::to_vec(h)?,
            Frame::HelloAck(a) => serde_json::to_vec(a)?,
            Frame::Auth(proof) => proof.clone(),
            Frame::ListReq => Vec::new(),
            Frame::ListResp(manifest) => serde_json::to_vec(manifest)?,
            Frame::GetReq(req) => serde_json::to_vec(req)?,
            Frame::Chunk(chunk) => {
                let mut out = Vec::with_capacity(40 + chunk.data.len());
                out.extend_from_slice(chunk.file_id.as_bytes());
                out.extend_from_slice(chunk.version_id.as_bytes());
                out.extend_from_slice(&chunk.offset.to_be_bytes());
                out.extend_from_slice(&chunk.data);
                out
            }
            Frame::Error(e) => serde_json::to_vec(e)?,
        })
    }

    fn decode(frame_type: u8, payload: &[u8]) -> Result<Frame, ProtoError> {
        Ok(match frame_type {
            TYPE_HELLO => Frame::Hello(serde_json::from_slice(payload)?),
            TYPE_HELLO_ACK => Frame::HelloAck(serde_json::from_slice(payload)?),
            TYPE_AUTH => Frame::Auth(payload.to_vec()),
            TYPE_LIST_REQ => {
                if !payload.is_empty() {
                    return Err(ProtoError::Malformed("LIST_REQ carries no payload".into()));
                }
                Frame::ListReq
            }
            TYPE_LIST_RESP => Frame::ListResp(serde_json::from_slice(payload)?),
            TYPE_GET_REQ => Frame::GetReq(serde_json::from_slice(payload)?),
            TYPE_GET_CHUNK => {
                if payload.len() < 40 {
                    return Err(ProtoError::Malformed(format!(
                        "chunk header truncated at {} bytes",
                        payload.len()
                    )));
                }
                let file_id = Uuid::from_slice(&payload[..16])
                    .map_err(|e| ProtoError::Malformed(e.to_string()))?;
                let version_id = Uuid::from_slice(&payload[16..32])
                    .map_err(|e| ProtoError::Malformed(e.to_string()))?;
                let offset = u64::from_be_bytes(
                    payload[32..40]
                        .try_into()
                        .expect("slice of fixed length 8"),
                );
                let data = payload[40..].to_vec();
                if data.len() > MAX_CHUNK {
                    return Err(ProtoError::Malformed(format!(
                        "chunk of {} bytes exceeds the 1 MiB limit",
                        data.len()
                    )));
                }
                Frame::Chunk(Chunk {
                    file_id,
                    version_id,
                    offset,
                    data,
                })
            }
            TYPE_ERROR => Frame::Error(serde_json::from_slice(payload)?),
            other => return Err(ProtoError::UnknownType(other)),
        })
    }
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ProtoError> {
    let payload = frame.encode_payload()?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(payload.len() as u64));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_u8(frame.frame_type()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A clean EOF before the length prefix is `Closed`;
/// EOF mid-frame is malformed.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtoError> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtoError::Closed)
        }
        Err(e) => return Err(e.into()),
    };
    if len as usize > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len as u64));
    }
    let frame_type = reader.read_u8().await?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Frame::decode(frame_type, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ErrorCode;

    async fn roundtrip(frame: Frame) -> Frame {
        let (mut a, mut b) = tokio::io::duplex(32 * 1024 * 1024);
        write_frame(&mut a, &frame).await.unwrap();
        read_frame(&mut b).await.unwrap()
    }

    #[tokio::test]
    async fn hello_roundtrips() {
        let hello = Frame::Hello(Hello {
            protocol_version: PROTOCOL_VERSION,
            code: "QWER".into(),
            client_nonce: "00".repeat(16),
        });
        match roundtrip(hello).await {
            Frame::Hello(h) => {
                assert_eq!(h.protocol_version, 1);
                assert_eq!(h.code, "QWER");
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_req_is_empty_payload() {
        match roundtrip(Frame::ListReq).await {
            Frame::ListReq => {}
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunk_binary_layout_roundtrips() {
        let chunk = Chunk {
            file_id: Uuid::new_v4(),
            version_id: Uuid::new_v4(),
            offset: 1024 * 1024,
            data: vec![7u8; 4096],
        };
        match roundtrip(Frame::Chunk(chunk.clone())).await {
            Frame::Chunk(back) => assert_eq!(back, chunk),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chunk_signals_eof() {
        let chunk = Chunk {
            file_id: Uuid::new_v4(),
            version_id: Uuid::new_v4(),
            offset: 5,
            data: Vec::new(),
        };
        match roundtrip(Frame::Chunk(chunk)).await {
            Frame::Chunk(back) => assert!(back.data.is_empty()),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_frame_roundtrips() {
        let err = Frame::Error(ErrorFrame::new(ErrorCode::AuthFailure, "bad code"));
        match roundtrip(err).await {
            Frame::Error(e) => assert_eq!(e.code, ErrorCode::AuthFailure),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(MAX_FRAME_LEN as u32 + 1).await.unwrap();
        a.write_u8(0x04).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtoError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn unknown_type_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(0).await.unwrap();
        a.write_u8(0x42).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtoError::UnknownType(0x42))
        ));
    }

    #[tokio::test]
    async fn eof_before_frame_is_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(ProtoError::Closed)));
    }

    #[tokio::test]
    async fn truncated_chunk_header_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(10).await.unwrap();
        a.write_u8(0x07).await.unwrap();
        a.write_all(&[0u8; 10]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ProtoError::Malformed(_))
        ));
    }
}
