//! DHT client contract for mutable items
//!
//! The swarm engine owns the actual DHT transport. Everything above it talks
//! to a [`DhtClient`], which stores and fetches signed mutable items keyed by
//! the SHA-1 of the publishing address (plus salt, when one is used).

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use swarmlink_crypto::record::{encode_for_signing, verify};
use swarmlink_crypto::{Address, Signature, Value};

use crate::error::Result;

/// 20-byte DHT lookup key
pub type Target = [u8; 20];

/// Lookup key for an address: `SHA-1(address || salt)`
pub fn lookup_target(address: &Address, salt: Option<&[u8]>) -> Target {
    let mut hasher = Sha1::new();
    hasher.update(address.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    let digest = hasher.finalize();

    let mut target = [0u8; 20];
    target.copy_from_slice(&digest);
    target
}

/// A signed mutable value as carried by `put`/`get`
#[derive(Debug, Clone, PartialEq)]
pub struct MutableItem {
    pub key: Address,
    pub value: Value,
    pub seq: u64,
    pub signature: Signature,
    pub salt: Option<Vec<u8>>,
}

impl MutableItem {
    pub fn target(&self) -> Target {
        lookup_target(&self.key, self.salt.as_deref())
    }

    /// Verify the signature over `{salt?, seq, v}` against `key`
    pub fn verify(&self) -> bool {
        match encode_for_signing(self.seq, &self.value, self.salt.as_deref()) {
            Ok(payload) => verify(&self.signature, &payload, &self.key),
            Err(_) => false,
        }
    }
}

/// An item returned by a `get`, with the node that answered
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub item: MutableItem,
    pub responder: [u8; 20],
}

/// Outcome of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutReceipt {
    /// Lookup key the item was stored under
    pub target: Target,
    /// Number of nodes that accepted the item
    pub stored_on: usize,
}

impl PutReceipt {
    pub fn target_hex(&self) -> String {
        hex::encode(self.target)
    }
}

/// Mutable-item DHT operations consumed from the swarm engine
///
/// Each call is a single network round trip with no retry.
#[async_trait]
pub trait DhtClient: Send + Sync {
    /// Store a signed item
    async fn put(&self, item: MutableItem) -> Result<PutReceipt>;

    /// Fetch the freshest item stored under `target`, if any
    async fn get(&self, target: &Target) -> Result<Option<StoredItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_target_is_sha1_of_key() {
        let address = Address::from_bytes([1u8; 32]);
        let target = lookup_target(&address, None);

        let digest = Sha1::digest([1u8; 32]);
        assert_eq!(&target[..], &digest[..]);
    }

    #[test]
    fn test_salt_changes_target() {
        let address = Address::from_bytes([1u8; 32]);
        assert_ne!(
            lookup_target(&address, None),
            lookup_target(&address, Some(b"salt"))
        );
    }
}
