use thiserror::Error;

use crate::types::Location;

pub type CtfsResult<T> = Result<T, CtfsError>;

#[derive(Debug, Error)]
pub enum CtfsError {
    /// Malformed bytes, links or trees. Never retried.
    #[error("structural error: {0}")]
    Structural(String),

    /// Authenticated decryption rejected the key or the ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("compare-and-swap conflict at {location:?}")]
    CasConflict { location: Location },

    #[error("gave up adding {name:?} after {attempts} conflicting commits")]
    ConflictRetriesExhausted { name: String, attempts: usize },

    #[error("erasure reconstruction failed: {0}")]
    Reconstruction(String),

    #[error("not writable: {0}")]
    NotWritable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CtfsError {
    pub fn structural(msg: impl Into<String>) -> Self {
        CtfsError::Structural(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        CtfsError::Decryption(msg.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        CtfsError::Storage(msg.to_string())
    }

    /// Only CAS conflicts are absorbed by the directory retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CtfsError::CasConflict { .. })
    }

    /// True when the caller simply lacks the right key.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CtfsError::Decryption(_))
    }
}
