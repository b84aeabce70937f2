use thiserror::Error;

/// Errors raised while parsing or converting core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("invalid address length: {0} (expected 20 bytes)")]
    InvalidAddressLength(usize),

    #[error("invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("invalid hash length: {0} (expected 32 bytes)")]
    InvalidHashLength(usize),

    #[error("invalid numeric string: {0}")]
    InvalidNumber(String),

    #[error("hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),
}
