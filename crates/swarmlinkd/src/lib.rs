//! swarmlink node
//!
//! Publishes folders as BitTorrent content, points stable addresses at them
//! through signed DHT records, and keeps open torrents, local files and the
//! metadata store consistent while content is loaded, edited and deleted.

pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod maintenance;
pub mod manager;
pub mod node;
pub mod storage;
pub mod swarm;
pub mod timeout;

pub use cache::{FileEntry, FileView, Handle, HandleCache, Stat};
pub use config::Config;
pub use content::{ContentOptions, Descriptor};
pub use error::{Error, ErrorKind, Result};
pub use maintenance::Maintenance;
pub use manager::{
    Credentials, Echo, EchoOptions, Listing, LoadOptions, Part, PublishData, PublishId,
    PublishOptions, PublishOutcome, ShredOptions, ShredOutcome, Shredded, TorrentManager,
};
pub use node::Node;
pub use storage::{ContentId, LoadRecord, MetadataRecord, MetadataStore, RecordKind, SeedRecord};
pub use swarm::{LocalNetwork, LocalSwarm, SwarmEngine, Torrent, TorrentFile};
