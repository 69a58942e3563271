//! Swarm engine contract
//!
//! The node drives content distribution through [`SwarmEngine`]: `seed`
//! shares a local folder, `add` fetches content by infohash, `destroy` stops
//! sharing. [`LocalSwarm`] is an in-process engine: engines attached to the
//! same [`LocalNetwork`] exchange content by copying it from a live provider
//! and share one [`MemoryDht`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use swarmlink_dht::{DhtClient, InfoHash, MemoryDht};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::content::{self, ContentOptions};
use crate::error::{Error, Result};

/// A file of an open torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path inside the torrent, starting with the torrent name
    pub path: PathBuf,
    pub length: u64,
    /// Where the file lives on disk
    pub local: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub infohash: InfoHash,
    pub name: String,
    pub length: u64,
    pub piece_length: u64,
    pub files: Vec<TorrentFile>,
}

impl Torrent {
    fn rooted_at(&self, dest: &Path) -> Torrent {
        Torrent {
            files: self
                .files
                .iter()
                .map(|file| TorrentFile {
                    local: dest.join(&file.path),
                    ..file.clone()
                })
                .collect(),
            ..self.clone()
        }
    }

    fn options(&self) -> ContentOptions {
        ContentOptions {
            name: Some(self.name.clone()),
            piece_length: Some(self.piece_length),
        }
    }
}

/// Peer-to-peer content engine
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Start sharing the content of `folder`
    async fn seed(&self, folder: &Path, opts: &ContentOptions) -> Result<Torrent>;

    /// Fetch `infohash` into `dest` (files land in `dest/<name>/...`) and share it
    async fn add(&self, infohash: &InfoHash, dest: &Path) -> Result<Torrent>;

    /// Stop sharing; returns whether the torrent was active
    async fn destroy(&self, infohash: &InfoHash, destroy_store: bool) -> Result<bool>;

    /// Currently active torrents
    async fn torrents(&self) -> Vec<Torrent>;

    /// DHT the engine participates in
    fn dht(&self) -> Arc<dyn DhtClient>;
}

/// Shared medium of in-process engines
#[derive(Debug, Default)]
pub struct LocalNetwork {
    dht: MemoryDht,
    /// Metadata of every torrent ever announced
    catalog: RwLock<HashMap<InfoHash, Torrent>>,
    /// Engines currently sharing a torrent, with their on-disk layout
    providers: RwLock<HashMap<InfoHash, Vec<(u64, Torrent)>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dht(&self) -> &MemoryDht {
        &self.dht
    }

    async fn announce(&self, engine: u64, torrent: &Torrent) {
        self.catalog
            .write()
            .await
            .entry(torrent.infohash)
            .or_insert_with(|| torrent.clone());

        let mut providers = self.providers.write().await;
        let entry = providers.entry(torrent.infohash).or_default();
        entry.retain(|(id, _)| *id != engine);
        entry.push((engine, torrent.clone()));
    }

    async fn withdraw(&self, engine: u64, infohash: &InfoHash) {
        let mut providers = self.providers.write().await;
        if let Some(entry) = providers.get_mut(infohash) {
            entry.retain(|(id, _)| *id != engine);
            if entry.is_empty() {
                providers.remove(infohash);
            }
        }
    }

    async fn listing(&self, infohash: &InfoHash) -> Option<Torrent> {
        self.catalog.read().await.get(infohash).cloned()
    }

    /// A provider other than `engine` whose files are all present
    async fn provider(&self, engine: u64, infohash: &InfoHash) -> Option<Torrent> {
        let candidates = self
            .providers
            .read()
            .await
            .get(infohash)
            .cloned()
            .unwrap_or_default();

        for (id, torrent) in candidates {
            if id != engine && is_complete(&torrent).await {
                return Some(torrent);
            }
        }
        None
    }
}

async fn is_complete(torrent: &Torrent) -> bool {
    for file in &torrent.files {
        match fs::metadata(&file.local).await {
            Ok(meta) if meta.is_file() && meta.len() == file.length => {}
            _ => return false,
        }
    }
    true
}

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

struct Active {
    torrent: Torrent,
    /// Folder created by `add`, removed with the store
    root: Option<PathBuf>,
}

/// In-process swarm engine
pub struct LocalSwarm {
    id: u64,
    network: Arc<LocalNetwork>,
    active: RwLock<HashMap<InfoHash, Active>>,
    opens: AtomicUsize,
}

impl LocalSwarm {
    pub fn new(network: Arc<LocalNetwork>) -> Self {
        LocalSwarm {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            network,
            active: RwLock::new(HashMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    /// Number of torrents this engine has opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    async fn verify(&self, root: &Path, listing: &Torrent) -> Result<()> {
        let descriptor = content::describe(root, &listing.options()).await?;
        if descriptor.infohash != listing.infohash {
            return Err(Error::Integrity {
                id: listing.infohash.to_hex(),
                expected: listing.infohash.to_hex(),
                actual: descriptor.infohash.to_hex(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SwarmEngine for LocalSwarm {
    async fn seed(&self, folder: &Path, opts: &ContentOptions) -> Result<Torrent> {
        let descriptor = content::describe(folder, opts).await?;

        if let Some(active) = self.active.read().await.get(&descriptor.infohash) {
            return Ok(active.torrent.clone());
        }

        let torrent = Torrent {
            infohash: descriptor.infohash,
            name: descriptor.name,
            length: descriptor.length,
            piece_length: descriptor.piece_length,
            files: descriptor
                .files
                .into_iter()
                .map(|file| TorrentFile {
                    local: folder.join(&file.relative),
                    path: file.path,
                    length: file.length,
                })
                .collect(),
        };

        self.network.announce(self.id, &torrent).await;
        self.active.write().await.insert(
            torrent.infohash,
            Active {
                torrent: torrent.clone(),
                root: None,
            },
        );
        self.opens.fetch_add(1, Ordering::Relaxed);

        info!("Seeding {} from {}", torrent.infohash, folder.display());
        Ok(torrent)
    }

    async fn add(&self, infohash: &InfoHash, dest: &Path) -> Result<Torrent> {
        if let Some(active) = self.active.read().await.get(infohash) {
            return Ok(active.torrent.clone());
        }

        let listing = self
            .network
            .listing(infohash)
            .await
            .ok_or_else(|| Error::not_found(infohash))?;
        let torrent = listing.rooted_at(dest);
        let root = dest.join(&torrent.name);

        let resumed = is_complete(&torrent).await && self.verify(&root, &listing).await.is_ok();
        if resumed {
            debug!("Resuming {} from {}", infohash, dest.display());
        } else {
            let provider = self
                .network
                .provider(self.id, infohash)
                .await
                .ok_or_else(|| Error::not_found(infohash))?;

            for (source, target) in provider.files.iter().zip(&torrent.files) {
                if let Some(parent) = target.local.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::copy(&source.local, &target.local).await?;
            }
            self.verify(&root, &listing).await?;
        }

        self.network.announce(self.id, &torrent).await;
        self.active.write().await.insert(
            *infohash,
            Active {
                torrent: torrent.clone(),
                root: Some(root),
            },
        );
        self.opens.fetch_add(1, Ordering::Relaxed);

        info!("Added {} into {}", infohash, dest.display());
        Ok(torrent)
    }

    async fn destroy(&self, infohash: &InfoHash, destroy_store: bool) -> Result<bool> {
        let Some(active) = self.active.write().await.remove(infohash) else {
            return Ok(false);
        };
        self.network.withdraw(self.id, infohash).await;

        if destroy_store {
            for file in &active.torrent.files {
                content::remove_path(&file.local).await?;
            }
            if let Some(root) = &active.root {
                content::remove_path(root).await?;
            }
        }

        debug!("Destroyed {} (store removed: {})", infohash, destroy_store);
        Ok(true)
    }

    async fn torrents(&self) -> Vec<Torrent> {
        self.active
            .read()
            .await
            .values()
            .map(|active| active.torrent.clone())
            .collect()
    }

    fn dht(&self) -> Arc<dyn DhtClient> {
        Arc::new(self.network.dht.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn folder_with(root: &Path, files: &[(&str, &str)]) -> PathBuf {
        let folder = root.join("source");
        for (name, body) in files {
            let path = folder.join(name);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(path, body).await.unwrap();
        }
        folder
    }

    #[tokio::test]
    async fn test_seed_then_add_elsewhere() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let folder = folder_with(temp.path(), &[("a.txt", "hello"), ("d/b.txt", "world")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();
        assert_eq!(seeded.files[0].local, folder.join("a.txt"));

        let dest = temp.path().join("fetched");
        let added = bob.add(&seeded.infohash, &dest).await.unwrap();

        assert_eq!(added.infohash, seeded.infohash);
        assert_eq!(added.files[0].local, dest.join("source").join("a.txt"));
        assert_eq!(
            fs::read_to_string(dest.join("source/d/b.txt")).await.unwrap(),
            "world"
        );
        assert_eq!(bob.open_count(), 1);
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let folder = folder_with(temp.path(), &[("a.txt", "hello")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();

        let dest = temp.path().join("fetched");
        bob.add(&seeded.infohash, &dest).await.unwrap();
        bob.add(&seeded.infohash, &dest).await.unwrap();
        assert_eq!(bob.open_count(), 1);
        assert_eq!(bob.torrents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_without_provider() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let unknown = InfoHash::from_bytes([3u8; 20]);
        let result = bob.add(&unknown, temp.path()).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));

        let folder = folder_with(temp.path(), &[("a.txt", "hello")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();
        assert!(alice.destroy(&seeded.infohash, false).await.unwrap());

        let result = bob.add(&seeded.infohash, &temp.path().join("x")).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_add_resumes_complete_data() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let folder = folder_with(temp.path(), &[("a.txt", "hello")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();
        let dest = temp.path().join("fetched");
        bob.add(&seeded.infohash, &dest).await.unwrap();
        bob.destroy(&seeded.infohash, false).await.unwrap();
        alice.destroy(&seeded.infohash, false).await.unwrap();

        let resumed = bob.add(&seeded.infohash, &dest).await.unwrap();
        assert_eq!(resumed.infohash, seeded.infohash);
    }

    #[tokio::test]
    async fn test_tampered_provider_rejected() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let folder = folder_with(temp.path(), &[("a.txt", "hello")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();
        fs::write(folder.join("a.txt"), "jello").await.unwrap();

        let result = bob.add(&seeded.infohash, &temp.path().join("x")).await;
        assert!(matches!(result, Err(Error::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_destroy_store() {
        let temp = TempDir::new().unwrap();
        let network = LocalNetwork::new();
        let alice = LocalSwarm::new(network.clone());
        let bob = LocalSwarm::new(network.clone());

        let folder = folder_with(temp.path(), &[("a.txt", "hello")]).await;
        let seeded = alice
            .seed(&folder, &ContentOptions::default())
            .await
            .unwrap();
        let dest = temp.path().join("fetched");
        bob.add(&seeded.infohash, &dest).await.unwrap();

        assert!(bob.destroy(&seeded.infohash, true).await.unwrap());
        assert!(!dest.join("source").exists());
        assert!(!bob.destroy(&seeded.infohash, true).await.unwrap());
        assert!(folder.join("a.txt").exists());
    }
}
