use sb_crypto::CryptoError;
use sb_engine::EngineError;
use sb_proto::{ErrorCode, ErrorFrame, ProtoError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed")]
    AuthFailure,

    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Peer reported {code:?}: {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Wire error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Fold a peer's ERROR frame into the local taxonomy where it maps
    /// cleanly; keep the rest as `Remote`.
    pub fn from_remote(frame: ErrorFrame) -> Self {
        match frame.code {
            ErrorCode::AuthFailure => NetError::AuthFailure,
            ErrorCode::NotFound => NetError::NotFound(frame.message),
            ErrorCode::IntegrityFailure => NetError::IntegrityFailure(frame.message),
            ErrorCode::Cancelled => NetError::Cancelled,
            _ => NetError::Remote {
                code: frame.code,
                message: frame.message,
            },
        }
    }

    /// Wire code for a local failure, for the outgoing ERROR frame.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            NetError::NotFound(_) => ErrorCode::NotFound,
            NetError::AuthFailure => ErrorCode::AuthFailure,
            NetError::IntegrityFailure(_) => ErrorCode::IntegrityFailure,
            NetError::Timeout(_) => ErrorCode::Timeout,
            NetError::Cancelled => ErrorCode::Cancelled,
            NetError::Protocol(_) | NetError::Proto(_) => ErrorCode::ProtocolError,
            NetError::Remote { code, .. } => *code,
            NetError::Engine(e) => engine_wire_code(e),
            NetError::Io(_) => ErrorCode::Io,
            NetError::Discovery(_) | NetError::Crypto(_) => ErrorCode::Internal,
        }
    }
}

fn engine_wire_code(e: &EngineError) -> ErrorCode {
    match e {
        EngineError::NotFound(_) => ErrorCode::NotFound,
        EngineError::AuthFailure => ErrorCode::AuthFailure,
        EngineError::Locked => ErrorCode::Locked,
        EngineError::IntegrityFailure(_) => ErrorCode::IntegrityFailure,
        EngineError::Conflict(_) => ErrorCode::Conflict,
        EngineError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
        EngineError::Cancelled => ErrorCode::Cancelled,
        EngineError::Store(_) => ErrorCode::Io,
        EngineError::Crypto(_) => ErrorCode::Internal,
    }
}
