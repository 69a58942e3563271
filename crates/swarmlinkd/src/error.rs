//! Node error types

use swarmlink_crypto::CryptoError;
use swarmlink_dht::DhtError;
use thiserror::Error;

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Integrity,
    DataCorrupted,
    Timeout,
    MissingCredential,
    EmptyContent,
    Path,
    Network,
    Storage,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{id} was not found")]
    NotFound { id: String },

    #[error("{id}: content hashes to {actual}, expected {expected}")]
    Integrity {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("{id}: stored signature does not match the content")]
    DataCorrupted { id: String },

    #[error("{id} took too long, it timed out - {kind}")]
    Timeout { id: String, kind: &'static str },

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("{id}: content can not be empty")]
    EmptyContent { id: String },

    #[error("{id}: path {path} is not valid")]
    Path { id: String, path: String },

    #[error("DHT error: {0}")]
    Dht(DhtError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Metadata store error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(id: impl ToString) -> Self {
        Error::NotFound { id: id.to_string() }
    }

    pub fn path(id: impl ToString, path: impl Into<String>) -> Self {
        Error::Path {
            id: id.to_string(),
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::DataCorrupted { .. } => ErrorKind::DataCorrupted,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::MissingCredential(_) => ErrorKind::MissingCredential,
            Error::EmptyContent { .. } => ErrorKind::EmptyContent,
            Error::Path { .. } => ErrorKind::Path,
            Error::Dht(DhtError::InvalidData(_)) => ErrorKind::Validation,
            Error::Dht(DhtError::InvalidSignature) => ErrorKind::DataCorrupted,
            Error::Dht(_) => ErrorKind::Network,
            Error::Crypto(_) => ErrorKind::Validation,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => ErrorKind::Storage,
        }
    }
}

impl From<DhtError> for Error {
    fn from(err: DhtError) -> Self {
        match err {
            DhtError::InvalidAddress(msg)
            | DhtError::InvalidInfoHash(msg)
            | DhtError::Validation(msg) => Error::Validation(msg),
            DhtError::KeyNotFound(id) => Error::NotFound { id },
            DhtError::MissingCredential(what) => Error::MissingCredential(what),
            DhtError::DataCorrupted(id) => Error::DataCorrupted { id },
            DhtError::Timeout => Error::Timeout {
                id: "dht".to_string(),
                kind: "dht",
            },
            other => Error::Dht(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_bencode::Error> for Error {
    fn from(err: serde_bencode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dht_errors_map_to_taxonomy() {
        let cases = [
            (DhtError::InvalidAddress("x".into()), ErrorKind::Validation),
            (DhtError::InvalidInfoHash("x".into()), ErrorKind::Validation),
            (DhtError::KeyNotFound("x".into()), ErrorKind::NotFound),
            (DhtError::MissingCredential("secret"), ErrorKind::MissingCredential),
            (DhtError::DataCorrupted("x".into()), ErrorKind::DataCorrupted),
            (DhtError::InvalidSignature, ErrorKind::DataCorrupted),
            (DhtError::InvalidData("x".into()), ErrorKind::Validation),
            (DhtError::Timeout, ErrorKind::Timeout),
            (
                DhtError::SequenceTooLow {
                    current: 2,
                    offered: 1,
                },
                ErrorKind::Network,
            ),
        ];

        for (dht, kind) in cases {
            assert_eq!(Error::from(dht).kind(), kind);
        }
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::Timeout {
            id: "abc".to_string(),
            kind: "start",
        };
        assert_eq!(err.to_string(), "abc took too long, it timed out - start");

        let err = Error::path("abc", "/missing.txt");
        assert!(err.to_string().contains("/missing.txt"));
        assert_eq!(err.kind(), ErrorKind::Path);
    }
}
