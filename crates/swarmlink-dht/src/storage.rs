//! DHT storage for mutable items

use crate::client::{MutableItem, Target};
use crate::error::{DhtError, Result};
use crate::{DEFAULT_ITEM_TTL_SECS, MAX_DHT_KEYS, MAX_DHT_STORAGE_BYTES, MAX_VALUE_SIZE};
use std::collections::HashMap;
use swarmlink_crypto::record::encoded_value_len;

/// Get current timestamp
fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A stored item with metadata
#[derive(Debug, Clone)]
pub struct StorageEntry {
    /// The signed item
    pub item: MutableItem,

    /// Bencoded size of the item's value
    pub size: usize,

    /// When this entry was last stored or refreshed
    pub stored_at: u64,

    /// When this entry expires (Unix timestamp)
    pub expires_at: u64,
}

impl StorageEntry {
    /// Check if entry is expired
    pub fn is_expired(&self) -> bool {
        now() >= self.expires_at
    }
}

/// Storage layer of an honest responder
///
/// Items are only accepted when their signature verifies and their sequence
/// number is not lower than the one already held for the same target. An
/// equal sequence refreshes the entry's lifetime.
#[derive(Debug)]
pub struct DhtStorage {
    /// Stored entries by lookup target
    entries: HashMap<Target, StorageEntry>,

    /// Current storage size in bytes
    current_size: usize,

    /// Maximum storage size
    max_size: usize,

    /// Maximum number of keys
    max_keys: usize,

    /// Lifetime of an entry that is not refreshed
    ttl_secs: u64,
}

impl DhtStorage {
    /// Create new DHT storage
    pub fn new() -> Self {
        Self::with_limits(MAX_DHT_STORAGE_BYTES, MAX_DHT_KEYS, DEFAULT_ITEM_TTL_SECS)
    }

    /// Create with custom limits
    pub fn with_limits(max_size: usize, max_keys: usize, ttl_secs: u64) -> Self {
        DhtStorage {
            entries: HashMap::new(),
            current_size: 0,
            max_size,
            max_keys,
            ttl_secs,
        }
    }

    /// Get current storage size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Get number of stored keys
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Check if storage has capacity for a value
    fn has_capacity(&self, value_size: usize) -> bool {
        self.key_count() < self.max_keys && (self.current_size + value_size) <= self.max_size
    }

    /// Store an item, returning its lookup target
    pub fn store(&mut self, item: MutableItem) -> Result<Target> {
        let size = encoded_value_len(&item.value)?;
        if size > MAX_VALUE_SIZE {
            return Err(DhtError::ValueTooLarge {
                size,
                max: MAX_VALUE_SIZE,
            });
        }

        if !item.verify() {
            return Err(DhtError::InvalidSignature);
        }

        let target = item.target();

        if let Some(existing) = self.entries.get(&target) {
            if !existing.is_expired() && item.seq < existing.item.seq {
                return Err(DhtError::SequenceTooLow {
                    current: existing.item.seq,
                    offered: item.seq,
                });
            }
        }

        // If key exists, remove old value first for accurate size tracking
        if let Some(old_entry) = self.entries.remove(&target) {
            self.current_size -= old_entry.size;
        }

        if !self.has_capacity(size) {
            // Try to make space by removing expired entries
            self.cleanup_expired();

            if self.key_count() >= self.max_keys {
                return Err(DhtError::TooManyKeys(self.max_keys));
            }
            if !self.has_capacity(size) {
                return Err(DhtError::StorageFull { max: self.max_size });
            }
        }

        let stored_at = now();
        self.entries.insert(
            target,
            StorageEntry {
                item,
                size,
                stored_at,
                expires_at: stored_at + self.ttl_secs,
            },
        );
        self.current_size += size;

        Ok(target)
    }

    /// Retrieve a live entry
    pub fn get(&self, target: &Target) -> Option<&StorageEntry> {
        self.entries.get(target).filter(|entry| !entry.is_expired())
    }

    /// Remove an entry
    pub fn remove(&mut self, target: &Target) -> Option<StorageEntry> {
        let entry = self.entries.remove(target)?;
        self.current_size -= entry.size;
        Some(entry)
    }

    /// Cleanup expired entries
    pub fn cleanup_expired(&mut self) -> usize {
        let mut removed = 0;
        let mut freed = 0;
        let current_time = now();

        self.entries.retain(|_, entry| {
            if entry.expires_at <= current_time {
                freed += entry.size;
                removed += 1;
                false
            } else {
                true
            }
        });

        self.current_size -= freed;
        removed
    }

    /// Clear all storage
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_size = 0;
    }
}

impl Default for DhtStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmlink_crypto::record::{encode_for_signing, sign};
    use swarmlink_crypto::{Identity, Signature, Stuff};

    fn signed_item(identity: &Identity, seq: u64, title: &str) -> MutableItem {
        swarmlink_crypto::init().unwrap();
        let mut stuff = Stuff::new();
        stuff.insert("title", title).unwrap();
        let value = stuff.to_value(&[0xaa; 20]);
        let payload = encode_for_signing(seq, &value, None).unwrap();
        let signature = sign(&payload, &identity.address(), &identity.secret_key).unwrap();

        MutableItem {
            key: identity.address(),
            value,
            seq,
            signature,
            salt: None,
        }
    }

    #[test]
    fn test_new_storage() {
        let storage = DhtStorage::new();
        assert_eq!(storage.size(), 0);
        assert_eq!(storage.key_count(), 0);
    }

    #[test]
    fn test_store_and_retrieve() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();
        let item = signed_item(&identity, 0, "first");

        let target = storage.store(item.clone()).unwrap();

        assert_eq!(storage.key_count(), 1);
        assert!(storage.size() > 0);
        assert_eq!(storage.get(&target).unwrap().item, item);
    }

    #[test]
    fn test_newer_sequence_replaces() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();

        let target = storage.store(signed_item(&identity, 0, "first")).unwrap();
        storage.store(signed_item(&identity, 1, "second")).unwrap();

        assert_eq!(storage.key_count(), 1);
        assert_eq!(storage.get(&target).unwrap().item.seq, 1);
    }

    #[test]
    fn test_lower_sequence_rejected() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();

        storage.store(signed_item(&identity, 5, "current")).unwrap();
        let result = storage.store(signed_item(&identity, 4, "stale"));

        assert!(matches!(
            result,
            Err(DhtError::SequenceTooLow {
                current: 5,
                offered: 4
            })
        ));
    }

    #[test]
    fn test_equal_sequence_refreshes() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();
        let item = signed_item(&identity, 2, "same");

        let target = storage.store(item.clone()).unwrap();
        let size = storage.size();
        storage.store(item).unwrap();

        assert_eq!(storage.key_count(), 1);
        assert_eq!(storage.size(), size);
        assert!(storage.get(&target).is_some());
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();
        let mut item = signed_item(&identity, 0, "value");
        item.signature = Signature::from_bytes([0u8; 64]);

        let result = storage.store(item);
        assert!(matches!(result, Err(DhtError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_value_rejected() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();
        let mut item = signed_item(&identity, 0, "original");
        item.value = signed_item(&identity, 0, "tampered").value;

        let result = storage.store(item);
        assert!(matches!(result, Err(DhtError::InvalidSignature)));
    }

    #[test]
    fn test_store_too_large() {
        let mut storage = DhtStorage::new();
        let identity = Identity::generate();
        let item = signed_item(&identity, 0, &"x".repeat(MAX_VALUE_SIZE));

        let result = storage.store(item);
        assert!(matches!(result, Err(DhtError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_too_many_keys() {
        let mut storage = DhtStorage::with_limits(MAX_DHT_STORAGE_BYTES, 1, 3600);
        storage
            .store(signed_item(&Identity::generate(), 0, "a"))
            .unwrap();

        let result = storage.store(signed_item(&Identity::generate(), 0, "b"));
        assert!(matches!(result, Err(DhtError::TooManyKeys(1))));
    }

    #[test]
    fn test_expired_entry() {
        let mut storage = DhtStorage::with_limits(MAX_DHT_STORAGE_BYTES, MAX_DHT_KEYS, 0);
        let identity = Identity::generate();

        let target = storage.store(signed_item(&identity, 0, "gone")).unwrap();

        assert!(storage.get(&target).is_none());
        assert_eq!(storage.cleanup_expired(), 1);
        assert_eq!(storage.size(), 0);
    }

    #[test]
    fn test_expired_entry_accepts_lower_sequence() {
        let mut storage = DhtStorage::with_limits(MAX_DHT_STORAGE_BYTES, MAX_DHT_KEYS, 0);
        let identity = Identity::generate();

        storage.store(signed_item(&identity, 9, "old")).unwrap();
        assert!(storage.store(signed_item(&identity, 1, "new")).is_ok());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut storage = DhtStorage::new();
        let target = storage
            .store(signed_item(&Identity::generate(), 0, "a"))
            .unwrap();
        storage
            .store(signed_item(&Identity::generate(), 0, "b"))
            .unwrap();

        assert!(storage.remove(&target).is_some());
        assert_eq!(storage.key_count(), 1);

        storage.clear();
        assert_eq!(storage.key_count(), 0);
        assert_eq!(storage.size(), 0);
    }
}
