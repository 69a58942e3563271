//! Pointer identities
//!
//! An identity is an Ed25519 key pair derived from a 32-byte seed. Its public
//! half is the *address* of a mutable pointer: it is both the DHT key the
//! signed record is stored under and the key the record is verified against.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::sign::ed25519;
use std::fmt;
use std::str::FromStr;

use crate::error::{CryptoError, Result};

/// Size of an address (Ed25519 public key) in bytes
pub const ADDRESS_SIZE: usize = 32;

/// Size of an Ed25519 secret key in bytes (seed followed by public key)
pub const SECRET_SIZE: usize = 64;

/// Size of the seed an identity is derived from
pub const SEED_SIZE: usize = 32;

/// Public key identifying a mutable pointer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Lowercase hex form, as used in store keys and magnet links
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;

        if bytes.len() != ADDRESS_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: ADDRESS_SIZE,
                actual: bytes.len(),
            });
        }

        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }

    pub fn public_key(&self) -> ed25519::PublicKey {
        ed25519::PublicKey(self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}...)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a hex-encoded 64-byte Ed25519 secret key
pub fn parse_secret(s: &str) -> Result<ed25519::SecretKey> {
    let bytes = hex::decode(s)?;
    if bytes.len() != SECRET_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SECRET_SIZE,
            actual: bytes.len(),
        });
    }
    ed25519::SecretKey::from_slice(&bytes).ok_or(CryptoError::InvalidKeyFormat)
}

/// The public half embedded in the last 32 bytes of an Ed25519 secret key
pub fn embedded_address(secret: &ed25519::SecretKey) -> Address {
    let mut arr = [0u8; ADDRESS_SIZE];
    arr.copy_from_slice(&secret.as_ref()[SEED_SIZE..]);
    Address(arr)
}

/// A key pair together with the seed it was derived from
#[derive(Clone)]
pub struct Identity {
    pub public_key: ed25519::PublicKey,
    pub secret_key: ed25519::SecretKey,
    pub seed: ed25519::Seed,
}

impl Identity {
    /// Generate a new identity from a random seed
    pub fn generate() -> Self {
        let mut seed = [0u8; SEED_SIZE];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed_bytes(seed)
    }

    /// Derive an identity deterministically from a seed
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != SEED_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SEED_SIZE,
                actual: seed.len(),
            });
        }
        let mut arr = [0u8; SEED_SIZE];
        arr.copy_from_slice(seed);
        Ok(Self::from_seed_bytes(arr))
    }

    pub fn from_seed_hex(s: &str) -> Result<Self> {
        Self::from_seed(&hex::decode(s)?)
    }

    fn from_seed_bytes(bytes: [u8; SEED_SIZE]) -> Self {
        let seed = ed25519::Seed(bytes);
        let (public_key, secret_key) = ed25519::keypair_from_seed(&seed);
        Identity {
            public_key,
            secret_key,
            seed,
        }
    }

    pub fn address(&self) -> Address {
        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(self.public_key.as_ref());
        Address(arr)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.as_ref())
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed.as_ref())
    }

    /// Hex form handed back to callers when a new identity is minted
    pub fn export(&self) -> ExportedIdentity {
        ExportedIdentity {
            address: self.address(),
            secret: self.secret_hex(),
            seed: self.seed_hex(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address().to_hex())
            .finish()
    }
}

/// Hex-encoded identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedIdentity {
    pub address: Address,
    pub secret: String,
    pub seed: String,
}

impl fmt::Debug for ExportedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity() {
        crate::init().unwrap();
        let identity = Identity::generate();

        assert_eq!(identity.address().as_bytes().len(), ADDRESS_SIZE);
        assert_eq!(identity.secret_hex().len(), SECRET_SIZE * 2);
        assert_eq!(identity.seed_hex().len(), SEED_SIZE * 2);
    }

    #[test]
    fn test_seed_derivation_is_deterministic() {
        crate::init().unwrap();
        let first = Identity::from_seed(&[7u8; SEED_SIZE]).unwrap();
        let second = Identity::from_seed_hex(&hex::encode([7u8; SEED_SIZE])).unwrap();

        assert_eq!(first.address(), second.address());
        assert_eq!(first.secret_hex(), second.secret_hex());
    }

    #[test]
    fn test_seed_wrong_length() {
        let result = Identity::from_seed(&[1u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: SEED_SIZE,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_address_hex() {
        crate::init().unwrap();
        let identity = Identity::generate();

        let hex = identity.address().to_hex();
        assert_eq!(hex.len(), ADDRESS_SIZE * 2);
        assert_eq!(Address::from_hex(&hex).unwrap(), identity.address());
        assert!(Address::from_hex("abcd").is_err());
        assert!(Address::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_secret_embeds_address() {
        crate::init().unwrap();
        let identity = Identity::generate();
        let secret = parse_secret(&identity.secret_hex()).unwrap();

        assert_eq!(embedded_address(&secret), identity.address());
    }

    #[test]
    fn test_address_serde_as_hex() {
        let address = Address::from_bytes([0xab; ADDRESS_SIZE]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));

        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, address);
    }
}
