//! Signed record codec
//!
//! A mutable pointer is the tuple `{seq, v}` signed by the address key, where
//! `v` maps `"ih"` to the raw infohash bytes and every other entry to UTF-8
//! text. The signing payload is the bencoded dictionary `{salt?, seq, v}` with
//! its outer `d`/`e` markers stripped, the same bytes other DHT
//! implementations sign, so records verify across implementations.

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};
use sodiumoxide::crypto::sign::ed25519;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CryptoError, Result};
use crate::identity::{embedded_address, Address};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Value key holding the infohash
pub const INFOHASH_KEY: &str = "ih";

/// Raw value map as it is signed and stored in the DHT
pub type Value = BTreeMap<String, ByteBuf>;

/// Free-form text fields published next to the infohash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Stuff(BTreeMap<String, String>);

impl Stuff {
    pub fn new() -> Self {
        Stuff(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key == INFOHASH_KEY {
            return Err(CryptoError::InvalidValue(format!(
                "\"{}\" is reserved for the infohash",
                INFOHASH_KEY
            )));
        }
        self.0.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build from an untyped JSON object, rejecting any non-string entry
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CryptoError::InvalidValue("stuff must be an object of strings".to_string())
        })?;

        let mut stuff = Stuff::new();
        for (key, entry) in object {
            let text = entry.as_str().ok_or_else(|| {
                CryptoError::InvalidValue(format!("stuff entry \"{}\" must be a string", key))
            })?;
            stuff.insert(key.clone(), text)?;
        }
        Ok(stuff)
    }

    /// Assemble the signed value map for `infohash`
    pub fn to_value(&self, infohash: &[u8]) -> Value {
        let mut value = Value::new();
        value.insert(INFOHASH_KEY.to_string(), ByteBuf::from(infohash.to_vec()));
        for (key, text) in &self.0 {
            value.insert(key.clone(), ByteBuf::from(text.as_bytes().to_vec()));
        }
        value
    }

    /// Split a value map into its infohash bytes and text fields
    pub fn from_value(value: &Value) -> Result<(Vec<u8>, Stuff)> {
        let infohash = value
            .get(INFOHASH_KEY)
            .ok_or_else(|| CryptoError::InvalidValue("value has no infohash".to_string()))?
            .to_vec();

        let mut stuff = Stuff::new();
        for (key, bytes) in value.iter().filter(|(key, _)| key.as_str() != INFOHASH_KEY) {
            let text = std::str::from_utf8(bytes).map_err(|_| {
                CryptoError::InvalidValue(format!("value entry \"{}\" is not UTF-8", key))
            })?;
            stuff.0.insert(key.clone(), text.to_string());
        }
        Ok((infohash, stuff))
    }
}

impl TryFrom<BTreeMap<String, String>> for Stuff {
    type Error = CryptoError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self> {
        if map.contains_key(INFOHASH_KEY) {
            return Err(CryptoError::InvalidValue(format!(
                "\"{}\" is reserved for the infohash",
                INFOHASH_KEY
            )));
        }
        Ok(Stuff(map))
    }
}

impl From<Stuff> for BTreeMap<String, String> {
    fn from(stuff: Stuff) -> Self {
        stuff.0
    }
}

/// An Ed25519 signature over a record payload
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;

        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }

        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Signature(arr))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize)]
struct SigningFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<&'a Bytes>,
    seq: u64,
    v: &'a Value,
}

/// Bencoded size of a value map, as limited by DHT responders
pub fn encoded_value_len(value: &Value) -> Result<usize> {
    serde_bencode::to_bytes(value)
        .map(|bytes| bytes.len())
        .map_err(|e| CryptoError::SerializationError(e.to_string()))
}

/// Canonical bytes signed for `{seq, v}` (and `salt` when present)
pub fn encode_for_signing(sequence: u64, value: &Value, salt: Option<&[u8]>) -> Result<Vec<u8>> {
    let fields = SigningFields {
        salt: salt.map(Bytes::new),
        seq: sequence,
        v: value,
    };

    let encoded = serde_bencode::to_bytes(&fields)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;

    match encoded.as_slice() {
        [b'd', inner @ .., b'e'] => Ok(inner.to_vec()),
        _ => Err(CryptoError::SerializationError(
            "encoded record is not a dictionary".to_string(),
        )),
    }
}

/// Sign `payload` with `secret`, which must belong to `address`
pub fn sign(payload: &[u8], address: &Address, secret: &ed25519::SecretKey) -> Result<Signature> {
    if embedded_address(secret) != *address {
        return Err(CryptoError::KeyMismatch(address.to_hex()));
    }

    let signature = ed25519::sign_detached(payload, secret);
    let mut bytes = [0u8; SIGNATURE_SIZE];
    bytes.copy_from_slice(signature.as_ref());
    Ok(Signature(bytes))
}

/// Check `signature` over `payload` against `address`
pub fn verify(signature: &Signature, payload: &[u8], address: &Address) -> bool {
    match ed25519::Signature::from_bytes(signature.as_bytes()) {
        Ok(sig) => ed25519::verify_detached(&sig, payload, &address.public_key()),
        Err(_) => false,
    }
}
