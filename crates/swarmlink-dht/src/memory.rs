//! In-process DHT
//!
//! [`MemoryDht`] behaves like a single honest responder: it verifies every
//! item it is handed, refuses stale sequence numbers, and forgets items that
//! are not refreshed within their TTL. Nodes sharing one instance see each
//! other's records, which is how standalone nodes and tests exchange pointers.

use async_trait::async_trait;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::{DhtClient, MutableItem, PutReceipt, StoredItem, Target};
use crate::error::Result;
use crate::storage::DhtStorage;

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryDhtStats {
    pub puts: u64,
    pub gets: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryDht {
    node_id: [u8; 20],
    storage: Arc<RwLock<DhtStorage>>,
    puts: Arc<AtomicU64>,
    gets: Arc<AtomicU64>,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::with_storage(DhtStorage::new())
    }

    pub fn with_storage(storage: DhtStorage) -> Self {
        let mut node_id = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut node_id);

        MemoryDht {
            node_id,
            storage: Arc::new(RwLock::new(storage)),
            puts: Arc::new(AtomicU64::new(0)),
            gets: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn node_id(&self) -> &[u8; 20] {
        &self.node_id
    }

    pub fn stats(&self) -> MemoryDhtStats {
        MemoryDhtStats {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
        }
    }

    pub async fn key_count(&self) -> usize {
        self.storage.read().await.key_count()
    }

    /// Drop expired items, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        self.storage.write().await.cleanup_expired()
    }
}

impl Default for MemoryDht {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DhtClient for MemoryDht {
    async fn put(&self, item: MutableItem) -> Result<PutReceipt> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let seq = item.seq;
        let target = self.storage.write().await.store(item)?;
        debug!("Stored mutable item {} (seq {})", hex::encode(target), seq);

        Ok(PutReceipt {
            target,
            stored_on: 1,
        })
    }

    async fn get(&self, target: &Target) -> Result<Option<StoredItem>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let storage = self.storage.read().await;

        Ok(storage.get(target).map(|entry| StoredItem {
            item: entry.item.clone(),
            responder: self.node_id,
        }))
    }
}
