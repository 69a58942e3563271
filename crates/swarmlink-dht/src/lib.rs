//! Swarmlink DHT layer
//!
//! This crate covers everything between a signed pointer record and the DHT:
//! - The [`DhtClient`] contract for mutable `put`/`get`
//! - An honest in-memory responder ([`MemoryDht`]) backed by [`DhtStorage`]
//! - Address resolution and publishing ([`PointerResolver`])

pub mod client;
pub mod error;
pub mod infohash;
pub mod memory;
pub mod resolver;
pub mod storage;

pub use client::{lookup_target, DhtClient, MutableItem, PutReceipt, StoredItem, Target};
pub use error::{DhtError, Result};
pub use infohash::InfoHash;
pub use memory::{MemoryDht, MemoryDhtStats};
pub use resolver::{magnet_link, PointerRecord, PointerResolver, Published, Resolved};
pub use storage::{DhtStorage, StorageEntry};

/// Maximum DHT storage per node (bytes)
pub const MAX_DHT_STORAGE_BYTES: usize = 100 * 1024 * 1024; // 100MB

/// Maximum number of DHT keys
pub const MAX_DHT_KEYS: usize = 10_000;

/// Maximum bencoded size of a mutable value (bytes)
pub const MAX_VALUE_SIZE: usize = 1000;

/// Lifetime of an item a responder holds without a refresh
pub const DEFAULT_ITEM_TTL_SECS: u64 = 2 * 60 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert!(MAX_VALUE_SIZE < MAX_DHT_STORAGE_BYTES);
        assert!(DEFAULT_ITEM_TTL_SECS > 0);
    }
}
