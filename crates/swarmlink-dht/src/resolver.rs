//! Address resolution and publishing
//!
//! [`PointerResolver`] binds an address to an infohash through a signed
//! mutable item. Every value read back is checked for a well-formed infohash
//! and a valid signature before it is handed to the caller, so nothing a
//! responder returns is trusted on its own.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swarmlink_crypto::identity::parse_secret;
use swarmlink_crypto::record::{encode_for_signing, sign, verify};
use swarmlink_crypto::{Address, CryptoError, Signature, Stuff, Value};
use tracing::debug;

use crate::client::{lookup_target, DhtClient, MutableItem, PutReceipt};
use crate::error::{DhtError, Result};
use crate::infohash::InfoHash;

/// URN namespace for public-key magnet links
pub const BTPK_PREFIX: &str = "urn:btpk:";

/// Magnet link resolving to whatever `address` currently points at
pub fn magnet_link(address: &Address) -> String {
    format!("magnet:?xs={}{}", BTPK_PREFIX, address.to_hex())
}

/// A signed binding of an address to an infohash at a sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerRecord {
    pub address: Address,
    pub infohash: InfoHash,
    pub sequence: u64,
    #[serde(default)]
    pub stuff: Stuff,
    pub signature: Signature,
}

impl PointerRecord {
    /// The value map covered by the signature
    pub fn value(&self) -> Value {
        self.stuff.to_value(self.infohash.as_bytes())
    }

    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(encode_for_signing(self.sequence, &self.value(), None)?)
    }

    /// True when the signature covers this exact record
    pub fn verify(&self) -> bool {
        match self.payload() {
            Ok(payload) => verify(&self.signature, &payload, &self.address),
            Err(_) => false,
        }
    }

    pub fn magnet(&self) -> String {
        magnet_link(&self.address)
    }

    fn to_item(&self) -> MutableItem {
        MutableItem {
            key: self.address,
            value: self.value(),
            seq: self.sequence,
            signature: self.signature,
            salt: None,
        }
    }
}

/// Result of resolving an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub magnet: String,
    pub record: PointerRecord,
    /// Hex id of the node that answered
    pub responded_by: String,
}

/// Result of publishing (or re-putting) a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub magnet: String,
    pub record: PointerRecord,
    /// Hex lookup key the record was stored under
    pub dht_hash: String,
    pub stored_on: usize,
}

impl Published {
    fn new(record: PointerRecord, receipt: PutReceipt) -> Self {
        Published {
            magnet: record.magnet(),
            dht_hash: receipt.target_hex(),
            stored_on: receipt.stored_on,
            record,
        }
    }
}

/// Resolver/publisher over a [`DhtClient`]
#[derive(Clone)]
pub struct PointerResolver {
    dht: Arc<dyn DhtClient>,
}

impl PointerResolver {
    pub fn new(dht: Arc<dyn DhtClient>) -> Self {
        PointerResolver { dht }
    }

    pub fn dht(&self) -> &Arc<dyn DhtClient> {
        &self.dht
    }

    /// Resolve `address` to its current, verified record
    pub async fn resolve(&self, address: &str) -> Result<Resolved> {
        let address =
            Address::from_hex(address).map_err(|_| DhtError::InvalidAddress(address.to_string()))?;
        let target = lookup_target(&address, None);

        debug!("Resolving {}", address);
        let stored = self
            .dht
            .get(&target)
            .await?
            .ok_or_else(|| DhtError::KeyNotFound(address.to_hex()))?;
        let item = stored.item;

        if item.key != address {
            return Err(DhtError::InvalidData(format!(
                "responder returned a record for {}",
                item.key
            )));
        }

        let (raw_infohash, stuff) = Stuff::from_value(&item.value).map_err(|e| match e {
            CryptoError::InvalidValue(msg) => DhtError::InvalidData(msg),
            other => DhtError::Crypto(other),
        })?;
        let infohash_hex = hex::encode(&raw_infohash);
        if !InfoHash::is_valid_hex(&infohash_hex) {
            return Err(DhtError::InvalidData(format!(
                "infohash {} is not {} hex characters",
                infohash_hex,
                crate::infohash::INFOHASH_SIZE * 2
            )));
        }
        let infohash = InfoHash::from_hex(&infohash_hex)?;

        let payload = encode_for_signing(item.seq, &item.value, item.salt.as_deref())?;
        if !verify(&item.signature, &payload, &address) {
            return Err(DhtError::InvalidSignature);
        }

        let record = PointerRecord {
            address,
            infohash,
            sequence: item.seq,
            stuff,
            signature: item.signature,
        };

        Ok(Resolved {
            magnet: record.magnet(),
            responded_by: hex::encode(stored.responder),
            record,
        })
    }

    /// Sign `{sequence, ih + stuff}` with `secret` and put it under `address`
    pub async fn publish(
        &self,
        address: Option<&str>,
        secret: Option<&str>,
        infohash: &str,
        stuff: &Stuff,
        sequence: u64,
    ) -> Result<Published> {
        if !InfoHash::is_valid_hex(infohash) {
            return Err(DhtError::Validation(format!(
                "infohash {:?} must be 40 hex characters",
                infohash
            )));
        }
        let (address, secret) = match (address, secret) {
            (Some(address), Some(secret)) => (address, secret),
            (None, _) => return Err(DhtError::MissingCredential("address")),
            (_, None) => return Err(DhtError::MissingCredential("secret")),
        };

        let address = Address::from_hex(address)
            .map_err(|e| DhtError::Validation(format!("address: {}", e)))?;
        let secret =
            parse_secret(secret).map_err(|e| DhtError::Validation(format!("secret: {}", e)))?;
        let infohash = InfoHash::from_hex(infohash)?;

        let value = stuff.to_value(infohash.as_bytes());
        let payload = encode_for_signing(sequence, &value, None)?;
        let signature = sign(&payload, &address, &secret).map_err(|e| match e {
            CryptoError::KeyMismatch(msg) => {
                DhtError::Validation(format!("secret does not belong to {}", msg))
            }
            other => DhtError::Crypto(other),
        })?;

        let record = PointerRecord {
            address,
            infohash,
            sequence,
            stuff: stuff.clone(),
            signature,
        };

        let receipt = self.dht.put(record.to_item()).await?;
        debug!(
            "Published {} -> {} (seq {})",
            record.address, record.infohash, record.sequence
        );

        Ok(Published::new(record, receipt))
    }

    /// Check a stored record against a freshly computed infohash and re-put it
    ///
    /// Fails with [`DhtError::DataCorrupted`] when the stored signature does
    /// not cover `infohash`, meaning the local content or metadata changed.
    pub async fn verify_ownership(
        &self,
        record: &PointerRecord,
        infohash: &InfoHash,
    ) -> Result<Published> {
        let candidate = PointerRecord {
            infohash: *infohash,
            ..record.clone()
        };

        if !candidate.verify() {
            return Err(DhtError::DataCorrupted(record.address.to_hex()));
        }

        let receipt = self.dht.put(candidate.to_item()).await?;
        Ok(Published::new(candidate, receipt))
    }

    /// Re-put an existing signed record unchanged
    pub async fn republish(&self, record: &PointerRecord) -> Result<PutReceipt> {
        let receipt = self.dht.put(record.to_item()).await?;
        debug!(
            "Republished {} (seq {})",
            record.address, record.sequence
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{StoredItem, Target};
    use crate::memory::MemoryDht;
    use async_trait::async_trait;
    use swarmlink_crypto::Identity;

    const IH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn resolver() -> (PointerResolver, MemoryDht) {
        swarmlink_crypto::init().unwrap();
        let dht = MemoryDht::new();
        (PointerResolver::new(Arc::new(dht.clone())), dht)
    }

    fn stuff(title: &str) -> Stuff {
        let mut stuff = Stuff::new();
        stuff.insert("title", title).unwrap();
        stuff
    }

    /// Responder that answers every `get` with a fixed item
    struct FixedResponder(MutableItem);

    #[async_trait]
    impl DhtClient for FixedResponder {
        async fn put(&self, item: MutableItem) -> Result<PutReceipt> {
            Ok(PutReceipt {
                target: item.target(),
                stored_on: 0,
            })
        }

        async fn get(&self, _target: &Target) -> Result<Option<StoredItem>> {
            Ok(Some(StoredItem {
                item: self.0.clone(),
                responder: [7u8; 20],
            }))
        }
    }

    fn signed_raw(identity: &Identity, seq: u64, value: Value) -> MutableItem {
        let payload = encode_for_signing(seq, &value, None).unwrap();
        MutableItem {
            key: identity.address(),
            value,
            seq,
            signature: sign(&payload, &identity.address(), &identity.secret_key).unwrap(),
            salt: None,
        }
    }

    #[tokio::test]
    async fn test_publish_then_resolve() {
        let (resolver, _dht) = resolver();
        let identity = Identity::generate();
        let address = identity.address().to_hex();

        let published = resolver
            .publish(
                Some(&address),
                Some(&identity.secret_hex()),
                IH,
                &stuff("v1"),
                0,
            )
            .await
            .unwrap();
        assert_eq!(published.magnet, format!("magnet:?xs=urn:btpk:{}", address));
        assert_eq!(
            published.dht_hash,
            hex::encode(lookup_target(&identity.address(), None))
        );

        let resolved = resolver.resolve(&address).await.unwrap();
        assert_eq!(resolved.record.infohash.to_hex(), IH);
        assert_eq!(resolved.record.sequence, 0);
        assert_eq!(resolved.record.stuff.get("title"), Some("v1"));
        assert_eq!(resolved.record, published.record);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let (resolver, _dht) = resolver();
        let address = Identity::generate().address().to_hex();

        let result = resolver.resolve(&address).await;
        assert!(matches!(result, Err(DhtError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_invalid_address() {
        let (resolver, _dht) = resolver();

        for bad in ["", "xyz", "abcd"] {
            let result = resolver.resolve(bad).await;
            assert!(matches!(result, Err(DhtError::InvalidAddress(_))), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_short_infohash() {
        swarmlink_crypto::init().unwrap();
        let identity = Identity::generate();
        let value = Stuff::new().to_value(&[0xab; 10]);
        let item = signed_raw(&identity, 0, value);
        let resolver = PointerResolver::new(Arc::new(FixedResponder(item)));

        let result = resolver.resolve(&identity.address().to_hex()).await;
        assert!(matches!(result, Err(DhtError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_signature() {
        swarmlink_crypto::init().unwrap();
        let identity = Identity::generate();
        let mut item = signed_raw(&identity, 0, stuff("v1").to_value(&[0xab; 20]));
        item.seq = 1;
        let resolver = PointerResolver::new(Arc::new(FixedResponder(item)));

        let result = resolver.resolve(&identity.address().to_hex()).await;
        assert!(matches!(result, Err(DhtError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_publish_validation() {
        let (resolver, _dht) = resolver();
        let identity = Identity::generate();
        let address = identity.address().to_hex();
        let secret = identity.secret_hex();

        let too_long = "a".repeat(41);
        let not_hex = format!("{}z", &IH[..39]);
        for bad in ["", "abc", too_long.as_str(), not_hex.as_str()] {
            let result = resolver
                .publish(Some(&address), Some(&secret), bad, &Stuff::new(), 0)
                .await;
            assert!(matches!(result, Err(DhtError::Validation(_))), "{:?}", bad);
        }

        let result = resolver
            .publish(None, Some(&secret), IH, &Stuff::new(), 0)
            .await;
        assert!(matches!(result, Err(DhtError::MissingCredential("address"))));

        let result = resolver
            .publish(Some(&address), None, IH, &Stuff::new(), 0)
            .await;
        assert!(matches!(result, Err(DhtError::MissingCredential("secret"))));

        let other = Identity::generate();
        let result = resolver
            .publish(Some(&address), Some(&other.secret_hex()), IH, &Stuff::new(), 0)
            .await;
        assert!(matches!(result, Err(DhtError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stale_sequence_refused_by_responder() {
        let (resolver, _dht) = resolver();
        let identity = Identity::generate();
        let address = identity.address().to_hex();
        let secret = identity.secret_hex();

        resolver
            .publish(Some(&address), Some(&secret), IH, &stuff("v2"), 2)
            .await
            .unwrap();
        let result = resolver
            .publish(Some(&address), Some(&secret), IH, &stuff("v1"), 1)
            .await;
        assert!(matches!(result, Err(DhtError::SequenceTooLow { .. })));
    }

    #[tokio::test]
    async fn test_verify_ownership() {
        let (resolver, dht) = resolver();
        let identity = Identity::generate();
        let address = identity.address().to_hex();

        let published = resolver
            .publish(
                Some(&address),
                Some(&identity.secret_hex()),
                IH,
                &stuff("mine"),
                4,
            )
            .await
            .unwrap();
        let record = published.record;

        let confirmed = resolver
            .verify_ownership(&record, &record.infohash)
            .await
            .unwrap();
        assert_eq!(confirmed.record, record);
        assert_eq!(dht.stats().puts, 2);

        let other = InfoHash::from_bytes([9u8; 20]);
        let result = resolver.verify_ownership(&record, &other).await;
        assert!(matches!(result, Err(DhtError::DataCorrupted(_))));
        assert_eq!(dht.stats().puts, 2);
    }

    #[tokio::test]
    async fn test_republish_keeps_signature() {
        let (resolver, dht) = resolver();
        let identity = Identity::generate();
        let address = identity.address().to_hex();

        let published = resolver
            .publish(
                Some(&address),
                Some(&identity.secret_hex()),
                IH,
                &stuff("keep"),
                0,
            )
            .await
            .unwrap();

        let receipt = resolver.republish(&published.record).await.unwrap();
        assert_eq!(receipt.target_hex(), published.dht_hash);
        assert_eq!(dht.stats().puts, 2);

        let resolved = resolver.resolve(&address).await.unwrap();
        assert_eq!(resolved.record.signature, published.record.signature);
    }

    #[test]
    fn test_record_serde() {
        swarmlink_crypto::init().unwrap();
        let identity = Identity::generate();
        let value = stuff("json").to_value(&[1u8; 20]);
        let item = signed_raw(&identity, 5, value);
        let record = PointerRecord {
            address: identity.address(),
            infohash: InfoHash::from_bytes([1u8; 20]),
            sequence: 5,
            stuff: stuff("json"),
            signature: item.signature,
        };
        assert!(record.verify());

        let json = serde_json::to_string(&record).unwrap();
        let parsed: PointerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.verify());
    }
}
