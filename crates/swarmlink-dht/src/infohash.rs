//! Content identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DhtError, Result};

/// Size of an infohash in bytes
pub const INFOHASH_SIZE: usize = 20;

/// SHA-1 identifier of an immutable content set
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFOHASH_SIZE]);

impl InfoHash {
    pub fn from_bytes(bytes: [u8; INFOHASH_SIZE]) -> Self {
        InfoHash(bytes)
    }

    /// Accepts exactly `INFOHASH_SIZE` bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INFOHASH_SIZE {
            return None;
        }
        let mut arr = [0u8; INFOHASH_SIZE];
        arr.copy_from_slice(bytes);
        Some(InfoHash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; INFOHASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True when `s` is exactly 40 hex characters
    pub fn is_valid_hex(s: &str) -> bool {
        s.len() == INFOHASH_SIZE * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Parse a 40-character hex infohash (either case)
    pub fn from_hex(s: &str) -> Result<Self> {
        if !Self::is_valid_hex(s) {
            return Err(DhtError::InvalidInfoHash(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| DhtError::InvalidInfoHash(s.to_string()))?;
        Self::from_slice(&bytes).ok_or_else(|| DhtError::InvalidInfoHash(s.to_string()))
    }
}

impl FromStr for InfoHash {
    type Err = DhtError;

    fn from_str(s: &str) -> Result<Self> {
        InfoHash::from_hex(s)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        InfoHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
