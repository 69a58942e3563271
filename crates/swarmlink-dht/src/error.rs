//! DHT error types

use thiserror::Error;

/// DHT-specific errors
#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No value found for {0}")]
    KeyNotFound(String),

    #[error("Invalid infohash: {0}")]
    InvalidInfoHash(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Stored signature does not match content for {0}")]
    DataCorrupted(String),

    #[error("Sequence {offered} is lower than stored sequence {current}")]
    SequenceTooLow { current: u64, offered: u64 },

    #[error("Storage full (max {max} bytes)")]
    StorageFull { max: usize },

    #[error("Value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Too many keys (max {0})")]
    TooManyKeys(usize),

    #[error("Operation timeout")]
    Timeout,

    #[error("Crypto error: {0}")]
    Crypto(#[from] swarmlink_crypto::CryptoError),
}

/// Result type for DHT operations
pub type Result<T> = std::result::Result<T, DhtError>;
