//! Metadata store
//!
//! A namespaced key-value store on SQLite. Keys are
//! `<seed|load>:<address|infohash>:<hex>` and values are JSON documents, so
//! a prefix scan over `seed:address:` walks every authored pointer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use swarmlink_crypto::{Address, Stuff};
use swarmlink_dht::{InfoHash, PointerRecord};
use tracing::info;

use crate::content::ContentOptions;
use crate::error::{Error, Result};

/// Identifier of a content set: a mutable pointer or an immutable infohash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentId {
    Address(Address),
    Infohash(InfoHash),
}

impl ContentId {
    pub fn to_hex(&self) -> String {
        match self {
            ContentId::Address(address) => address.to_hex(),
            ContentId::Infohash(infohash) => infohash.to_hex(),
        }
    }

    fn namespace(&self) -> &'static str {
        match self {
            ContentId::Address(_) => "address",
            ContentId::Infohash(_) => "infohash",
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = Error;

    /// 64 hex characters name an address, 40 an infohash
    fn from_str(s: &str) -> Result<Self> {
        if InfoHash::is_valid_hex(s) {
            return Ok(ContentId::Infohash(InfoHash::from_hex(s)?));
        }
        Address::from_hex(s).map(ContentId::Address).map_err(|_| {
            Error::Validation(format!("{:?} is neither an address nor an infohash", s))
        })
    }
}

impl From<Address> for ContentId {
    fn from(address: Address) -> Self {
        ContentId::Address(address)
    }
}

impl From<InfoHash> for ContentId {
    fn from(infohash: InfoHash) -> Self {
        ContentId::Infohash(infohash)
    }
}

/// Which side of the ownership split a record sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Content this node authored
    Seed,
    /// Content fetched from the network
    Load,
}

impl RecordKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordKind::Seed => "seed:",
            RecordKind::Load => "load:",
        }
    }
}

/// Store key of a record
pub fn record_key(kind: RecordKind, id: &ContentId) -> String {
    format!("{}{}:{}", kind.prefix(), id.namespace(), id.to_hex())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Content this node owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub infohash: InfoHash,
    /// Signed record, for content published under an address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<PointerRecord>,
    /// Storage subfolder id
    pub dir: String,
    #[serde(default)]
    pub desc: ContentOptions,
    pub length: u64,
    pub count: usize,
    /// Identifier this content was forked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
    pub updated_at: i64,
}

impl SeedRecord {
    pub fn new(
        infohash: InfoHash,
        dir: String,
        desc: ContentOptions,
        length: u64,
        count: usize,
    ) -> Self {
        SeedRecord {
            infohash,
            pointer: None,
            dir,
            desc,
            length,
            count,
            echo: None,
            updated_at: now(),
        }
    }

    pub fn id(&self) -> ContentId {
        match &self.pointer {
            Some(pointer) => ContentId::Address(pointer.address),
            None => ContentId::Infohash(self.infohash),
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        self.pointer.as_ref().map(|p| p.sequence)
    }

    pub fn stuff(&self) -> Stuff {
        self.pointer
            .as_ref()
            .map(|p| p.stuff.clone())
            .unwrap_or_default()
    }

    pub fn touch(&mut self) {
        self.updated_at = now();
    }
}

/// Content fetched from the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub infohash: InfoHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub name: String,
    pub size: u64,
    pub count: usize,
    pub updated_at: i64,
}

impl LoadRecord {
    pub fn new(
        infohash: InfoHash,
        address: Option<Address>,
        name: String,
        size: u64,
        count: usize,
    ) -> Self {
        LoadRecord {
            infohash,
            address,
            name,
            size,
            count,
            updated_at: now(),
        }
    }

    pub fn id(&self) -> ContentId {
        match self.address {
            Some(address) => ContentId::Address(address),
            None => ContentId::Infohash(self.infohash),
        }
    }
}

/// Either kind of record, as returned by listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetadataRecord {
    Seed(SeedRecord),
    Load(LoadRecord),
}

impl MetadataRecord {
    pub fn id(&self) -> ContentId {
        match self {
            MetadataRecord::Seed(record) => record.id(),
            MetadataRecord::Load(record) => record.id(),
        }
    }
}

/// Persistent metadata store
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn new(base_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base_dir).await?;
        let db_path = base_dir.join("metadata.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        info!("Opening metadata store: {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value FROM records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&value)?))
            }
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO records (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a record was removed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All values whose key starts with `prefix`, ordered by key
    pub async fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let rows = sqlx::query(
            "SELECT value FROM records WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value: String = row.try_get("value")?;
            values.push(serde_json::from_str(&value)?);
        }
        Ok(values)
    }

    pub async fn get_seed(&self, id: &ContentId) -> Result<Option<SeedRecord>> {
        self.get(&record_key(RecordKind::Seed, id)).await
    }

    pub async fn put_seed(&self, record: &SeedRecord) -> Result<()> {
        self.put(&record_key(RecordKind::Seed, &record.id()), record)
            .await
    }

    pub async fn get_load(&self, id: &ContentId) -> Result<Option<LoadRecord>> {
        self.get(&record_key(RecordKind::Load, id)).await
    }

    pub async fn put_load(&self, record: &LoadRecord) -> Result<()> {
        self.put(&record_key(RecordKind::Load, &record.id()), record)
            .await
    }

    pub async fn delete_record(&self, kind: RecordKind, id: &ContentId) -> Result<bool> {
        self.delete(&record_key(kind, id)).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
