//! Handle cache
//!
//! Open torrents are tracked twice: an index from identifier to handle that
//! lookups hit first, and the ordered list of active handles that
//! [`HandleCache::find`] scans when the index misses.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use swarmlink_crypto::Address;
use swarmlink_dht::{InfoHash, PointerRecord};
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::ContentId;
use crate::swarm::Torrent;

/// A file of an open handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path inside the torrent, starting with the torrent name
    pub path: PathBuf,
    /// Root-relative path with `/` separators, always starting with `/`
    pub url_path: String,
    pub length: u64,
    /// Where the file lives on disk
    pub local: PathBuf,
}

/// Root-relative url path of a torrent path: the torrent name is dropped
pub fn url_path(torrent_path: &Path) -> String {
    let mut url = String::new();
    for component in torrent_path.components().skip(1) {
        if let Component::Normal(segment) = component {
            url.push('/');
            url.push_str(&segment.to_string_lossy().replace('\\', "/"));
        }
    }
    if url.is_empty() {
        url.push('/');
    }
    url
}

/// Whether a requested path names a single file
pub fn is_file_path(path: &str) -> bool {
    Path::new(path).extension().is_some()
}

/// Whether `url_path` sits at or below the folder `folder`
fn in_folder(url_path: &str, folder: &str) -> bool {
    let folder = folder.trim_end_matches('/');
    match url_path.strip_prefix(folder) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// What a path resolves to inside a handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FileView {
    File(FileEntry),
    Folder(Vec<FileEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    File,
    Folder,
}

/// An open torrent together with what the node knows about it
#[derive(Debug, Clone)]
pub struct Handle {
    pub infohash: InfoHash,
    pub address: Option<Address>,
    pub own: bool,
    /// Storage subfolder id, for owned content
    pub dir: Option<String>,
    pub folder: PathBuf,
    pub name: String,
    pub length: u64,
    /// Signed record, for content reached through an address
    pub pointer: Option<PointerRecord>,
    pub files: Vec<FileEntry>,
}

impl Handle {
    pub fn from_torrent(torrent: Torrent, folder: PathBuf) -> Self {
        let files = torrent
            .files
            .into_iter()
            .map(|file| FileEntry {
                url_path: url_path(&file.path),
                path: file.path,
                length: file.length,
                local: file.local,
            })
            .collect();

        Handle {
            infohash: torrent.infohash,
            address: None,
            own: false,
            dir: None,
            folder,
            name: torrent.name,
            length: torrent.length,
            pointer: None,
            files,
        }
    }

    pub fn id(&self) -> ContentId {
        match self.address {
            Some(address) => ContentId::Address(address),
            None => ContentId::Infohash(self.infohash),
        }
    }

    pub fn matches(&self, id: &ContentId) -> bool {
        match id {
            ContentId::Address(address) => self.address.as_ref() == Some(address),
            ContentId::Infohash(infohash) => self.infohash == *infohash,
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|file| file.url_path == path)
    }

    pub fn folder_files(&self, path: &str) -> Vec<&FileEntry> {
        self.files
            .iter()
            .filter(|file| in_folder(&file.url_path, path))
            .collect()
    }

    /// File for a path with an extension, otherwise every file under it
    pub fn view(&self, path: &str) -> Option<FileView> {
        if is_file_path(path) {
            self.file(path).cloned().map(FileView::File)
        } else {
            Some(FileView::Folder(
                self.folder_files(path).into_iter().cloned().collect(),
            ))
        }
    }

    pub fn stat(&self, path: &str) -> Option<Stat> {
        if is_file_path(path) {
            self.file(path).map(|_| Stat::File)
        } else if self.folder_files(path).is_empty() {
            None
        } else {
            Some(Stat::Folder)
        }
    }
}

#[derive(Default)]
pub struct HandleCache {
    index: RwLock<HashMap<ContentId, Arc<Handle>>>,
    active: RwLock<Vec<Arc<Handle>>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened handle under its identifier
    pub async fn insert(&self, handle: Handle) -> Arc<Handle> {
        let handle = Arc::new(handle);
        let id = handle.id();

        {
            let mut active = self.active.write().await;
            active.retain(|existing| existing.infohash != handle.infohash);
            active.push(handle.clone());
        }
        self.index.write().await.insert(id, handle.clone());

        handle
    }

    /// Index lookup only
    pub async fn get(&self, id: &ContentId) -> Option<Arc<Handle>> {
        self.index.read().await.get(id).cloned()
    }

    /// First active handle matching `id`
    pub async fn find(&self, id: &ContentId) -> Option<Arc<Handle>> {
        self.active
            .read()
            .await
            .iter()
            .find(|handle| handle.matches(id))
            .cloned()
    }

    /// Index lookup, falling back to the active list and warming the index
    pub async fn lookup(&self, id: &ContentId) -> Option<Arc<Handle>> {
        if let Some(handle) = self.get(id).await {
            debug!("Cache hit for {}", id);
            return Some(handle);
        }

        let handle = self.find(id).await?;
        self.index.write().await.insert(*id, handle.clone());
        Some(handle)
    }

    /// Forget `id` in both the index and the active list
    pub async fn remove(&self, id: &ContentId) -> Option<Arc<Handle>> {
        let indexed = self.index.write().await.remove(id);

        let mut active = self.active.write().await;
        let position = active.iter().position(|handle| handle.matches(id));
        let removed = position.map(|i| active.remove(i));

        if let Some(handle) = removed.as_ref().or(indexed.as_ref()) {
            self.index
                .write()
                .await
                .retain(|_, cached| cached.infohash != handle.infohash);
        }

        removed.or(indexed)
    }

    pub async fn active(&self) -> Vec<Arc<Handle>> {
        self.active.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.active.read().await.is_empty()
    }

    /// Drop everything, returning the handles that were active
    pub async fn clear(&self) -> Vec<Arc<Handle>> {
        self.index.write().await.clear();
        std::mem::take(&mut *self.active.write().await)
    }
}
