use sb_crypto::CryptoError;
use sb_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed")]
    AuthFailure,

    #[error("Box is locked — unlock with password first")]
    Locked,

    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("File exceeds the maximum size of {max} bytes")]
    QuotaExceeded { max: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(StoreError::Database(e))
    }
}
