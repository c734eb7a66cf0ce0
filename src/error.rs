//! Error types for minichain

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid proof of work")]
    InvalidProofOfWork,
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("unknown ancestor: {0}")]
    UnknownAncestor(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("duplicate transaction")]
    DuplicateTransaction,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
