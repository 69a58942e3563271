//! Torrent lifecycle manager
//!
//! Every content set is identified by a [`ContentId`]. Its state is spread
//! over three places that the manager keeps consistent:
//! - the swarm engine (whether a torrent is open),
//! - the metadata store (a seed record for owned content, a load record for
//!   fetched content, never both),
//! - the handle cache (what `load` and the path lookups serve from).
//!
//! Owned content lives in `storage/<dir>`. Fetched content lives in
//! `storage/<infohash>/<name>/...`, or `storage/<address>/<infohash>/<name>/...`
//! when it was reached through an address.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use swarmlink_crypto::identity::{embedded_address, parse_secret};
use swarmlink_crypto::{Address, ExportedIdentity, Identity, Stuff};
use swarmlink_dht::{InfoHash, PointerRecord, PointerResolver, Published, Resolved};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{FileEntry, FileView, Handle, HandleCache, Stat};
use crate::config::Config;
use crate::content::{self, ContentOptions, Descriptor};
use crate::error::{Error, Result};
use crate::storage::{
    ContentId, LoadRecord, MetadataRecord, MetadataStore, RecordKind, SeedRecord,
};
use crate::swarm::SwarmEngine;
use crate::timeout::{bounded, Watch};

/// Hidden sidecar counting writes into an owned folder
pub const WRITES_FILE: &str = ".writes.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct WriteCounter {
    writes: u64,
}

/// Address plus the secret that signs for it
#[derive(Clone)]
pub struct Credentials {
    pub address: Address,
    pub secret: String,
}

impl Credentials {
    pub fn new(address: &str, secret: &str) -> Result<Self> {
        let address = Address::from_hex(address)
            .map_err(|e| Error::Validation(format!("address: {}", e)))?;
        if secret.is_empty() {
            return Err(Error::MissingCredential("secret"));
        }
        let credentials = Credentials {
            address,
            secret: secret.to_string(),
        };
        credentials.verify()?;
        Ok(credentials)
    }

    /// The secret must parse and carry this address as its public half
    pub fn verify(&self) -> Result<()> {
        let secret =
            parse_secret(&self.secret).map_err(|e| Error::Validation(format!("secret: {}", e)))?;
        if embedded_address(&secret) != self.address {
            return Err(Error::Validation(format!(
                "secret does not belong to {}",
                self.address
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Where a publish goes
#[derive(Debug, Clone)]
pub enum PublishId {
    /// Immutable content: update an owned infohash, or start a new one
    Content(Option<InfoHash>),
    /// Mutable content: update an owned address, or mint a new identity
    Pointer(Option<Credentials>),
}

impl PublishId {
    /// Build from loosely typed fields
    ///
    /// An infohash alone selects immutable content, an address with its
    /// secret selects mutable content. Any other combination is rejected.
    pub fn from_fields(
        infohash: Option<&str>,
        address: Option<&str>,
        secret: Option<&str>,
    ) -> Result<Self> {
        match (infohash, address, secret) {
            (Some(infohash), None, None) => {
                Ok(PublishId::Content(Some(InfoHash::from_hex(infohash)?)))
            }
            (None, Some(address), Some(secret)) => {
                Ok(PublishId::Pointer(Some(Credentials::new(address, secret)?)))
            }
            (None, Some(_), None) => Err(Error::MissingCredential("secret")),
            (None, None, Some(_)) => Err(Error::MissingCredential("address")),
            _ => Err(Error::Validation(
                "identifier must be an infohash or an address with its secret".to_string(),
            )),
        }
    }
}

/// A named part of a multi-part upload
#[derive(Debug, Clone)]
pub struct Part {
    /// Path of the part below the publish path
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum PublishData {
    /// Written to the publish path itself
    Body(Vec<u8>),
    /// Written below the publish path, one file per part
    Parts(Vec<Part>),
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub timeout: Option<Duration>,
    /// Explicit sequence number for mutable content
    pub seq: Option<u64>,
    pub desc: Option<ContentOptions>,
    pub stuff: Option<Stuff>,
}

#[derive(Debug, Clone, Default)]
pub struct ShredOptions {
    pub timeout: Option<Duration>,
    /// Needed below the root of owned mutable content
    pub secret: Option<String>,
    pub desc: Option<ContentOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct EchoOptions {
    pub timeout: Option<Duration>,
    pub desc: Option<ContentOptions>,
    pub stuff: Option<Stuff>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub id: ContentId,
    pub path: String,
    pub record: SeedRecord,
    /// DHT result, for mutable content
    pub published: Option<Published>,
    /// Only set when the publish minted a new identity
    pub identity: Option<ExportedIdentity>,
    pub writes: u64,
}

/// Content forked into a new owned identifier
#[derive(Debug, Clone, Serialize)]
pub struct Echo {
    pub record: SeedRecord,
    /// New identity, when an address was forked
    pub identity: Option<ExportedIdentity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Shredded {
    /// The whole content set and its record are gone
    Removed(MetadataRecord),
    /// Owned content was rehashed (and republished for an address)
    Updated(SeedRecord),
    /// Fetched content was copied into a new owned identifier
    Forked(Echo),
}

#[derive(Debug, Clone, Serialize)]
pub struct ShredOutcome {
    pub id: ContentId,
    pub path: String,
    /// Whether an open handle was torn down first
    pub stopped: bool,
    pub result: Shredded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Listing {
    Detailed(Vec<MetadataRecord>),
    Ids(Vec<String>),
}

/// Path below a content folder; `..` and prefixes are rejected
fn relative_path(path: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => relative.push(segment),
            _ => {
                return Err(Error::Validation(format!(
                    "path {:?} leaves the content folder",
                    path
                )))
            }
        }
    }
    Ok(relative)
}

/// Root-relative form used to match file url paths
fn url_request(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn new_dir() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..20].to_string()
}

fn view_of(handle: &Handle, id: &ContentId, path: &str) -> Result<FileView> {
    handle.view(path).ok_or_else(|| Error::path(id, path))
}

async fn exists(path: &Path) -> Result<bool> {
    Ok(fs::try_exists(path).await?)
}

pub struct TorrentManager {
    swarm: Arc<dyn SwarmEngine>,
    store: MetadataStore,
    resolver: PointerResolver,
    cache: HandleCache,
    storage_dir: PathBuf,
    default_timeout: Option<Duration>,
}

impl TorrentManager {
    pub async fn new(config: &Config, swarm: Arc<dyn SwarmEngine>) -> Result<Self> {
        swarmlink_crypto::init()?;

        let storage_dir = config.storage_dir();
        fs::create_dir_all(&storage_dir).await?;
        let store = MetadataStore::new(&config.base_dir()).await?;

        Ok(Self::with_store(
            store,
            swarm,
            storage_dir,
            config.timeouts.operation(),
        ))
    }

    pub fn with_store(
        store: MetadataStore,
        swarm: Arc<dyn SwarmEngine>,
        storage_dir: PathBuf,
        default_timeout: Option<Duration>,
    ) -> Self {
        let resolver = PointerResolver::new(swarm.dht());
        TorrentManager {
            swarm,
            store,
            resolver,
            cache: HandleCache::new(),
            storage_dir,
            default_timeout,
        }
    }

    pub fn resolver(&self) -> &PointerResolver {
        &self.resolver
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        requested.or(self.default_timeout)
    }

    async fn discard(&self, infohash: InfoHash) {
        if let Err(e) = self.swarm.destroy(&infohash, false).await {
            warn!("Failed to tear down {}: {}", infohash, e);
        }
    }

    fn teardown(&self, infohash: InfoHash) -> Option<BoxFuture<'_, ()>> {
        Some(self.discard(infohash).boxed())
    }

    // ---------------------------------------------------------------------
    // load
    // ---------------------------------------------------------------------

    /// Open `id` (or reuse its open handle) and return the view of `path`
    pub async fn load(&self, id: &ContentId, path: &str, opts: LoadOptions) -> Result<FileView> {
        let path = url_request(path);

        if let Some(handle) = self.cache.lookup(id).await {
            return view_of(&handle, id, &path);
        }

        let handle = self.open(id, self.timeout(opts.timeout)).await?;
        view_of(&handle, id, &path)
    }

    async fn open(&self, id: &ContentId, timeout: Option<Duration>) -> Result<Arc<Handle>> {
        let handle = match self.store.get_seed(id).await? {
            Some(record) => self.open_owned(id, record, timeout).await?,
            None => match id {
                ContentId::Infohash(infohash) => self.open_fetched(*infohash, timeout).await?,
                ContentId::Address(address) => self.open_resolved(*address, timeout).await?,
            },
        };

        info!(
            "Opened {} ({} files, own: {})",
            id,
            handle.files.len(),
            handle.own
        );
        Ok(self.cache.insert(handle).await)
    }

    /// Reseed owned content and check it still hashes (and signs) the same
    async fn open_owned(
        &self,
        id: &ContentId,
        record: SeedRecord,
        timeout: Option<Duration>,
    ) -> Result<Handle> {
        let folder = self.storage_dir.join(&record.dir);

        let torrent = bounded(
            &Watch::new(id, "start", timeout),
            self.swarm.seed(&folder, &record.desc),
            self.teardown(record.infohash),
        )
        .await?;

        // signed content is checked against its pointer instead
        if record.pointer.is_none() && torrent.infohash != record.infohash {
            self.discard(torrent.infohash).await;
            return Err(Error::Integrity {
                id: id.to_hex(),
                expected: record.infohash.to_hex(),
                actual: torrent.infohash.to_hex(),
            });
        }

        let mut handle = Handle::from_torrent(torrent, folder);
        handle.own = true;
        handle.dir = Some(record.dir.clone());

        if let Some(pointer) = &record.pointer {
            let infohash = handle.infohash;
            let confirmed = bounded(
                &Watch::new(id, "own", timeout),
                async {
                    self.resolver
                        .verify_ownership(pointer, &infohash)
                        .await
                        .map_err(Error::from)
                },
                self.teardown(infohash),
            )
            .await?;

            handle.address = Some(pointer.address);
            handle.pointer = Some(confirmed.record);
        }

        Ok(handle)
    }

    /// Fetch immutable content into `storage/<infohash>`
    async fn open_fetched(&self, infohash: InfoHash, timeout: Option<Duration>) -> Result<Handle> {
        let id = ContentId::Infohash(infohash);
        let folder = self.storage_dir.join(infohash.to_hex());

        let torrent = bounded(
            &Watch::new(id, "add", timeout),
            self.swarm.add(&infohash, &folder),
            self.teardown(infohash),
        )
        .await?;

        let record = LoadRecord::new(
            torrent.infohash,
            None,
            torrent.name.clone(),
            torrent.length,
            torrent.files.len(),
        );
        bounded(
            &Watch::new(id, "store", None),
            self.store.put_load(&record),
            self.teardown(infohash),
        )
        .await?;

        Ok(Handle::from_torrent(torrent, folder))
    }

    /// Resolve an address and fetch what it points at into `storage/<address>`
    async fn open_resolved(&self, address: Address, timeout: Option<Duration>) -> Result<Handle> {
        let id = ContentId::Address(address);
        let resolved: Resolved = bounded(
            &Watch::new(id, "resolve", timeout),
            async {
                self.resolver
                    .resolve(&address.to_hex())
                    .await
                    .map_err(Error::from)
            },
            None,
        )
        .await?;
        let infohash = resolved.record.infohash;

        let folder = self.storage_dir.join(address.to_hex());
        let data_path = folder.join(infohash.to_hex());
        if !exists(&data_path).await? {
            // stale data of an earlier infohash
            content::remove_path(&folder).await?;
            fs::create_dir_all(&folder).await?;
        }

        let torrent = bounded(
            &Watch::new(id, "add", timeout),
            self.swarm.add(&infohash, &data_path),
            self.teardown(infohash),
        )
        .await?;

        let record = LoadRecord::new(
            torrent.infohash,
            Some(address),
            torrent.name.clone(),
            torrent.length,
            torrent.files.len(),
        );
        bounded(
            &Watch::new(id, "store", None),
            self.store.put_load(&record),
            self.teardown(infohash),
        )
        .await?;

        let mut handle = Handle::from_torrent(torrent, folder);
        handle.address = Some(address);
        handle.pointer = Some(resolved.record);
        Ok(handle)
    }

    // ---------------------------------------------------------------------
    // publish
    // ---------------------------------------------------------------------

    /// Write `data` at `path` into owned content and republish it
    pub async fn publish(
        &self,
        id: PublishId,
        path: &str,
        data: PublishData,
        opts: PublishOptions,
    ) -> Result<PublishOutcome> {
        let relative = relative_path(path)?;
        match id {
            PublishId::Content(existing) => {
                self.publish_content(existing, &relative, path, data, opts)
                    .await
            }
            PublishId::Pointer(credentials) => {
                self.publish_pointer(credentials, &relative, path, data, opts)
                    .await
            }
        }
    }

    async fn publish_content(
        &self,
        existing: Option<InfoHash>,
        relative: &Path,
        path: &str,
        data: PublishData,
        opts: PublishOptions,
    ) -> Result<PublishOutcome> {
        let timeout = self.timeout(opts.timeout);

        let prior = match existing {
            Some(infohash) => {
                let id = ContentId::Infohash(infohash);
                self.take_out(&id).await?;
                Some(
                    self.store
                        .get_seed(&id)
                        .await?
                        .ok_or_else(|| Error::not_found(id))?,
                )
            }
            None => None,
        };

        let dir = prior
            .as_ref()
            .map(|r| r.dir.clone())
            .unwrap_or_else(new_dir);
        let desc = opts
            .desc
            .or_else(|| prior.as_ref().map(|r| r.desc.clone()))
            .unwrap_or_default();
        let folder = self.storage_dir.join(&dir);

        let writes = self.write_data(&folder, relative, data, timeout).await?;
        let descriptor = self.describe(&folder, &desc, timeout).await?;

        if let Some(prior) = &prior {
            if prior.infohash != descriptor.infohash {
                self.store
                    .delete_record(RecordKind::Seed, &ContentId::Infohash(prior.infohash))
                    .await?;
            }
        }

        let mut record = SeedRecord::new(
            descriptor.infohash,
            dir,
            desc,
            descriptor.length,
            descriptor.files.len(),
        );
        record.echo = prior.and_then(|r| r.echo);
        self.store.put_seed(&record).await?;

        info!("Published {} ({} bytes)", record.infohash, record.length);
        Ok(PublishOutcome {
            id: record.id(),
            path: path.to_string(),
            record,
            published: None,
            identity: None,
            writes,
        })
    }

    async fn publish_pointer(
        &self,
        credentials: Option<Credentials>,
        relative: &Path,
        path: &str,
        data: PublishData,
        opts: PublishOptions,
    ) -> Result<PublishOutcome> {
        let timeout = self.timeout(opts.timeout);

        let (credentials, identity, prior) = match credentials {
            Some(credentials) => {
                credentials.verify()?;
                let id = ContentId::Address(credentials.address);
                self.take_out(&id).await?;
                let prior = self
                    .store
                    .get_seed(&id)
                    .await?
                    .ok_or_else(|| Error::not_found(id))?;
                (credentials, None, Some(prior))
            }
            None => {
                let identity = Identity::generate();
                let credentials = Credentials {
                    address: identity.address(),
                    secret: identity.secret_hex(),
                };
                (credentials, Some(identity.export()), None)
            }
        };

        let sequence = opts.seq.unwrap_or_else(|| {
            prior
                .as_ref()
                .and_then(|r| r.sequence())
                .map(|s| s + 1)
                .unwrap_or(0)
        });
        let dir = prior
            .as_ref()
            .map(|r| r.dir.clone())
            .unwrap_or_else(new_dir);
        let desc = opts
            .desc
            .or_else(|| prior.as_ref().map(|r| r.desc.clone()))
            .unwrap_or_default();
        let stuff = opts
            .stuff
            .or_else(|| prior.as_ref().map(|r| r.stuff()))
            .unwrap_or_default();
        let folder = self.storage_dir.join(&dir);

        let writes = self.write_data(&folder, relative, data, timeout).await?;
        let descriptor = self.describe(&folder, &desc, timeout).await?;

        let published = self
            .sign_and_put(&credentials, &descriptor.infohash, &stuff, sequence, timeout)
            .await?;

        let mut record = SeedRecord::new(
            descriptor.infohash,
            dir,
            desc,
            descriptor.length,
            descriptor.files.len(),
        );
        record.pointer = Some(published.record.clone());
        record.echo = prior.and_then(|r| r.echo);
        self.store.put_seed(&record).await?;

        info!(
            "Published {} -> {} (seq {})",
            credentials.address, record.infohash, sequence
        );
        Ok(PublishOutcome {
            id: record.id(),
            path: path.to_string(),
            record,
            published: Some(published),
            identity,
            writes,
        })
    }

    async fn sign_and_put(
        &self,
        credentials: &Credentials,
        infohash: &InfoHash,
        stuff: &Stuff,
        sequence: u64,
        timeout: Option<Duration>,
    ) -> Result<Published> {
        let address = credentials.address.to_hex();
        bounded(
            &Watch::new(&address, "publish", timeout),
            async {
                self.resolver
                    .publish(
                        Some(&address),
                        Some(&credentials.secret),
                        &infohash.to_hex(),
                        stuff,
                        sequence,
                    )
                    .await
                    .map_err(Error::from)
            },
            None,
        )
        .await
    }

    async fn describe(
        &self,
        folder: &Path,
        desc: &ContentOptions,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        bounded(
            &Watch::new(folder.display(), "data", timeout),
            content::describe(folder, desc),
            None,
        )
        .await
    }

    /// Write publish data below `folder` and bump the write counter
    async fn write_data(
        &self,
        folder: &Path,
        relative: &Path,
        data: PublishData,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        let target = folder.join(relative);
        fs::create_dir_all(folder).await?;

        match data {
            PublishData::Body(bytes) => {
                if relative.as_os_str().is_empty() {
                    return Err(Error::Validation(
                        "a single body needs a file path".to_string(),
                    ));
                }
                write_file(&target, bytes, timeout).await?;
            }
            PublishData::Parts(parts) => {
                fs::create_dir_all(&target).await?;
                for part in parts {
                    let name = relative_path(&part.name)?;
                    if name.as_os_str().is_empty() {
                        return Err(Error::Validation("a part needs a name".to_string()));
                    }
                    write_file(&target.join(name), part.data, timeout).await?;
                }
            }
        }

        bump_writes(folder).await
    }

    // ---------------------------------------------------------------------
    // shred / echo
    // ---------------------------------------------------------------------

    /// Delete `path` (or everything, for `/`) from a content set
    pub async fn shred(
        &self,
        id: &ContentId,
        path: &str,
        opts: ShredOptions,
    ) -> Result<ShredOutcome> {
        let timeout = self.timeout(opts.timeout);
        let relative = relative_path(path)?;

        let stopped = bounded(&Watch::new(id, "stop", timeout), self.take_out(id), None).await?;

        let result = if let Some(record) = self.store.get_seed(id).await? {
            self.shred_owned(id, record, &relative, path, opts, timeout)
                .await?
        } else if let Some(record) = self.store.get_load(id).await? {
            self.shred_fetched(id, record, &relative, path, opts, timeout)
                .await?
        } else {
            return Err(Error::not_found(id));
        };

        Ok(ShredOutcome {
            id: *id,
            path: path.to_string(),
            stopped,
            result,
        })
    }

    /// Remove `target` below `root`; an emptied set takes `folder` and its record with it
    async fn remove_below(
        &self,
        id: &ContentId,
        kind: RecordKind,
        folder: &Path,
        root: &Path,
        relative: &Path,
        path: &str,
    ) -> Result<()> {
        let target = root.join(relative);
        if !exists(&target).await? {
            return Err(Error::path(id, path));
        }
        content::remove_path(&target).await?;

        if content::is_empty(root).await? {
            content::remove_path(folder).await?;
            self.store.delete_record(kind, id).await?;
            info!("Removed {}: no content left", id);
            return Err(Error::EmptyContent { id: id.to_hex() });
        }
        Ok(())
    }

    async fn shred_owned(
        &self,
        id: &ContentId,
        mut record: SeedRecord,
        relative: &Path,
        path: &str,
        opts: ShredOptions,
        timeout: Option<Duration>,
    ) -> Result<Shredded> {
        let folder = self.storage_dir.join(&record.dir);
        if !exists(&folder).await? {
            return Err(Error::not_found(id));
        }

        if relative.as_os_str().is_empty() {
            content::remove_path(&folder).await?;
            self.store.delete_record(RecordKind::Seed, id).await?;
            info!("Removed owned {}", id);
            return Ok(Shredded::Removed(MetadataRecord::Seed(record)));
        }

        let credentials = match id {
            ContentId::Address(address) => {
                let secret = opts.secret.ok_or(Error::MissingCredential("secret"))?;
                let credentials = Credentials {
                    address: *address,
                    secret,
                };
                credentials.verify()?;
                Some(credentials)
            }
            ContentId::Infohash(_) => None,
        };

        self.remove_below(id, RecordKind::Seed, &folder, &folder, relative, path)
            .await?;

        if let Some(desc) = opts.desc {
            record.desc = desc;
        }
        let descriptor = self.describe(&folder, &record.desc, timeout).await?;

        match credentials {
            Some(credentials) => {
                let sequence = record.sequence().map(|s| s + 1).unwrap_or(0);
                let published = self
                    .sign_and_put(
                        &credentials,
                        &descriptor.infohash,
                        &record.stuff(),
                        sequence,
                        timeout,
                    )
                    .await?;
                record.pointer = Some(published.record);
            }
            None => {
                if record.infohash != descriptor.infohash {
                    self.store.delete_record(RecordKind::Seed, id).await?;
                }
            }
        }

        record.infohash = descriptor.infohash;
        record.length = descriptor.length;
        record.count = descriptor.files.len();
        record.touch();
        self.store.put_seed(&record).await?;

        info!("Shredded {} from {}, now {}", path, id, record.infohash);
        Ok(Shredded::Updated(record))
    }

    async fn shred_fetched(
        &self,
        id: &ContentId,
        record: LoadRecord,
        relative: &Path,
        path: &str,
        opts: ShredOptions,
        timeout: Option<Duration>,
    ) -> Result<Shredded> {
        let (folder, root) = self.fetched_paths(id, &record);
        if !exists(&folder).await? {
            return Err(Error::not_found(id));
        }

        if relative.as_os_str().is_empty() {
            content::remove_path(&folder).await?;
            self.store.delete_record(RecordKind::Load, id).await?;
            info!("Removed fetched {}", id);
            return Ok(Shredded::Removed(MetadataRecord::Load(record)));
        }

        self.remove_below(id, RecordKind::Load, &folder, &root, relative, path)
            .await?;

        let echo = self
            .fork(
                id,
                &folder,
                &root,
                opts.desc.unwrap_or_default(),
                Stuff::new(),
                timeout,
            )
            .await?;
        Ok(Shredded::Forked(echo))
    }

    fn fetched_paths(&self, id: &ContentId, record: &LoadRecord) -> (PathBuf, PathBuf) {
        let folder = self.storage_dir.join(id.to_hex());
        let root = match id {
            ContentId::Infohash(_) => folder.join(&record.name),
            ContentId::Address(_) => folder
                .join(record.infohash.to_hex())
                .join(&record.name),
        };
        (folder, root)
    }

    /// Take ownership of fetched content under a brand-new identifier
    pub async fn echo(&self, id: &ContentId, opts: EchoOptions) -> Result<Echo> {
        let timeout = self.timeout(opts.timeout);
        self.take_out(id).await?;

        if self.store.get_seed(id).await?.is_some() {
            return Err(Error::Validation(format!("{} is already owned", id)));
        }
        let record = self
            .store
            .get_load(id)
            .await?
            .ok_or_else(|| Error::not_found(id))?;

        let (folder, root) = self.fetched_paths(id, &record);
        if content::is_empty(&root).await? {
            return Err(Error::not_found(id));
        }

        self.fork(
            id,
            &folder,
            &root,
            opts.desc.unwrap_or_default(),
            opts.stuff.unwrap_or_default(),
            timeout,
        )
        .await
    }

    /// Copy `root` into a fresh owned folder, drop the fetched copy and its
    /// record, and record the copy as new owned content
    async fn fork(
        &self,
        id: &ContentId,
        folder: &Path,
        root: &Path,
        desc: ContentOptions,
        stuff: Stuff,
        timeout: Option<Duration>,
    ) -> Result<Echo> {
        let dir = new_dir();
        let dest = self.storage_dir.join(&dir);

        content::copy_dir(root, &dest).await?;
        content::remove_path(folder).await?;
        self.store.delete_record(RecordKind::Load, id).await?;

        let descriptor = self.describe(&dest, &desc, timeout).await?;
        let mut record = SeedRecord::new(
            descriptor.infohash,
            dir,
            desc,
            descriptor.length,
            descriptor.files.len(),
        );
        record.echo = Some(id.to_hex());

        let identity = match id {
            ContentId::Infohash(_) => None,
            ContentId::Address(_) => {
                let identity = Identity::generate();
                let credentials = Credentials {
                    address: identity.address(),
                    secret: identity.secret_hex(),
                };
                let published = self
                    .sign_and_put(&credentials, &descriptor.infohash, &stuff, 0, timeout)
                    .await?;
                record.pointer = Some(published.record);
                Some(identity.export())
            }
        };

        self.store.put_seed(&record).await?;
        info!("Forked {} into {}", id, record.id());

        Ok(Echo { record, identity })
    }

    // ---------------------------------------------------------------------
    // handles
    // ---------------------------------------------------------------------

    /// Tear down the open handle of `id`, keeping its files
    pub async fn take_out(&self, id: &ContentId) -> Result<bool> {
        self.stop(id, false).await
    }

    /// Tear down the open handle of `id`; a no-op when nothing is open
    pub async fn stop(&self, id: &ContentId, destroy_store: bool) -> Result<bool> {
        match self.cache.remove(id).await {
            Some(handle) => {
                debug!("Stopping {}", id);
                self.swarm.destroy(&handle.infohash, destroy_store).await
            }
            None => Ok(false),
        }
    }

    /// First active handle for `id`
    pub async fn find_handle(&self, id: &ContentId) -> Option<Arc<Handle>> {
        self.cache.find(id).await
    }

    /// Cached handle, or one reopened from a stored record
    async fn cached_or_restored(&self, id: &ContentId) -> Result<Option<Arc<Handle>>> {
        if let Some(handle) = self.cache.lookup(id).await {
            return Ok(Some(handle));
        }

        let known =
            self.store.get_seed(id).await?.is_some() || self.store.get_load(id).await?.is_some();
        if !known {
            return Ok(None);
        }
        self.open(id, self.default_timeout).await.map(Some)
    }

    pub async fn check_for_torrent(&self, id: &ContentId, path: &str) -> Result<Option<FileView>> {
        Ok(self
            .cached_or_restored(id)
            .await?
            .and_then(|handle| handle.view(&url_request(path))))
    }

    pub async fn check_file(&self, id: &ContentId, path: &str) -> Result<Option<FileEntry>> {
        Ok(self
            .cached_or_restored(id)
            .await?
            .and_then(|handle| handle.file(&url_request(path)).cloned()))
    }

    pub async fn check_folder(&self, id: &ContentId, path: &str) -> Result<Option<Vec<FileEntry>>> {
        Ok(self.cached_or_restored(id).await?.and_then(|handle| {
            let files: Vec<FileEntry> = handle
                .folder_files(&url_request(path))
                .into_iter()
                .cloned()
                .collect();
            (!files.is_empty()).then_some(files)
        }))
    }

    pub async fn check_stat(&self, id: &ContentId, path: &str) -> Result<Option<Stat>> {
        Ok(self
            .cached_or_restored(id)
            .await?
            .and_then(|handle| handle.stat(&url_request(path))))
    }

    // ---------------------------------------------------------------------
    // identities, resolution, listings
    // ---------------------------------------------------------------------

    pub async fn resolve(&self, address: &str) -> Result<Resolved> {
        Ok(self.resolver.resolve(address).await?)
    }

    pub fn create_identity(&self) -> ExportedIdentity {
        Identity::generate().export()
    }

    /// Identity derived from a hex seed
    pub fn generate_identity(&self, seed: &str) -> Result<ExportedIdentity> {
        Ok(Identity::from_seed_hex(seed)?.export())
    }

    /// Every seed record
    pub async fn list_authored(&self) -> Result<Vec<SeedRecord>> {
        self.store.scan_prefix(RecordKind::Seed.prefix()).await
    }

    /// Every record, or just their identifiers
    pub async fn list_all(&self, detailed: bool) -> Result<Listing> {
        let mut records: Vec<MetadataRecord> = self
            .list_authored()
            .await?
            .into_iter()
            .map(MetadataRecord::Seed)
            .collect();
        let loads: Vec<LoadRecord> = self.store.scan_prefix(RecordKind::Load.prefix()).await?;
        records.extend(loads.into_iter().map(MetadataRecord::Load));

        if detailed {
            Ok(Listing::Detailed(records))
        } else {
            Ok(Listing::Ids(
                records.iter().map(|record| record.id().to_hex()).collect(),
            ))
        }
    }

    /// Signed records of every authored address
    pub async fn authored_pointers(&self) -> Result<Vec<PointerRecord>> {
        let records: Vec<SeedRecord> = self.store.scan_prefix("seed:address:").await?;
        Ok(records.into_iter().filter_map(|r| r.pointer).collect())
    }

    /// Signed records of open addresses this node does not own
    pub async fn observed_pointers(&self) -> Vec<PointerRecord> {
        self.cache
            .active()
            .await
            .iter()
            .filter(|handle| !handle.own && handle.address.is_some())
            .filter_map(|handle| handle.pointer.clone())
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.swarm.torrents().await.len()
    }

    /// Tear down every open handle and close the store
    pub async fn shutdown(&self) {
        let cleared = self.cache.clear().await;
        debug!("Dropped {} cached handles", cleared.len());
        for torrent in self.swarm.torrents().await {
            self.discard(torrent.infohash).await;
        }
        self.store.close().await;
    }
}

async fn write_file(target: &Path, bytes: Vec<u8>, timeout: Option<Duration>) -> Result<()> {
    bounded(
        &Watch::new(target.display(), "write", timeout),
        async {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(target, bytes).await?;
            Ok(())
        },
        None,
    )
    .await
}

async fn bump_writes(folder: &Path) -> Result<u64> {
    let sidecar = folder.join(WRITES_FILE);
    let counter = if exists(&sidecar).await? {
        let mut counter: WriteCounter = serde_json::from_slice(&fs::read(&sidecar).await?)?;
        counter.writes += 1;
        counter
    } else {
        WriteCounter::default()
    };
    fs::write(&sidecar, serde_json::to_vec(&counter)?).await?;
    Ok(counter.writes)
}
