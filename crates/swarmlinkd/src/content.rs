//! Content descriptors
//!
//! A folder is described the way a BitTorrent v1 client would describe it:
//! the info dictionary (`files`, `name`, `piece length`, `pieces`) is
//! bencoded and its SHA-1 is the infohash. Hidden files (any path segment
//! starting with `.`) are not part of the content.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use swarmlink_dht::InfoHash;
use tokio::fs;

use crate::error::{Error, Result};

const MIN_PIECE_LENGTH: u64 = 16 * 1024;
const MAX_PIECE_LENGTH: u64 = 16 * 1024 * 1024;

/// Options controlling how content is described
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentOptions {
    /// Torrent name; defaults to the folder name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_length: Option<u64>,
}

/// One file of a described content set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedFile {
    /// Path inside the torrent, starting with the torrent name
    pub path: PathBuf,
    /// Path relative to the described folder
    pub relative: PathBuf,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub infohash: InfoHash,
    pub name: String,
    pub length: u64,
    pub piece_length: u64,
    pub files: Vec<DescribedFile>,
}

#[derive(Serialize)]
struct InfoFile {
    length: u64,
    path: Vec<String>,
}

#[derive(Serialize)]
struct InfoDict<'a> {
    files: Vec<InfoFile>,
    name: &'a str,
    #[serde(rename = "piece length")]
    piece_length: u64,
    pieces: ByteBuf,
}

/// Piece length used when none is requested: roughly 1024 pieces
pub fn default_piece_length(total: u64) -> u64 {
    (total / 1024)
        .next_power_of_two()
        .clamp(MIN_PIECE_LENGTH, MAX_PIECE_LENGTH)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Every non-hidden file under `root`, relative to it, in a stable order
pub async fn visible_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut entries = fs::read_dir(root.join(&relative)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_hidden(&name) {
                continue;
            }

            let child = relative.join(name.as_ref());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }

    files.sort_by_key(|path| segments(path));
    Ok(files)
}

/// True when `root` is missing or holds no visible file
pub async fn is_empty(root: &Path) -> Result<bool> {
    if !fs::try_exists(root).await? {
        return Ok(true);
    }
    Ok(visible_files(root).await?.is_empty())
}

/// Recursively copy the visible content of `from` into `to`
pub async fn copy_dir(from: &Path, to: &Path) -> Result<u64> {
    fs::create_dir_all(to).await?;
    let mut copied = 0;
    for relative in visible_files(from).await? {
        let target = to.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        copied += fs::copy(from.join(&relative), &target).await?;
    }
    Ok(copied)
}

/// Remove a file or a whole directory tree
pub async fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}

fn segments(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect()
}

/// Describe the content of `folder`
pub async fn describe(folder: &Path, opts: &ContentOptions) -> Result<Descriptor> {
    let name = match &opts.name {
        Some(name) => name.clone(),
        None => folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::path(folder.display(), "/"))?,
    };

    let relatives = visible_files(folder).await?;
    if relatives.is_empty() {
        return Err(Error::EmptyContent {
            id: folder.display().to_string(),
        });
    }

    let mut files = Vec::with_capacity(relatives.len());
    let mut length = 0u64;
    for relative in relatives {
        let file_length = fs::metadata(folder.join(&relative)).await?.len();
        length += file_length;
        files.push(DescribedFile {
            path: Path::new(&name).join(&relative),
            relative,
            length: file_length,
        });
    }

    let piece_length = opts
        .piece_length
        .unwrap_or_else(|| default_piece_length(length));
    if !piece_length.is_power_of_two() || piece_length > MAX_PIECE_LENGTH {
        return Err(Error::Validation(format!(
            "piece length {} must be a power of two no larger than {}",
            piece_length, MAX_PIECE_LENGTH
        )));
    }

    let mut pieces = Vec::new();
    let mut piece = Vec::with_capacity(piece_length as usize);
    for file in &files {
        let bytes = fs::read(folder.join(&file.relative)).await?;
        let mut rest = bytes.as_slice();
        while !rest.is_empty() {
            let take = (piece_length as usize - piece.len()).min(rest.len());
            piece.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if piece.len() == piece_length as usize {
                pieces.extend_from_slice(&Sha1::digest(&piece));
                piece.clear();
            }
        }
    }
    if !piece.is_empty() {
        pieces.extend_from_slice(&Sha1::digest(&piece));
    }

    let info = InfoDict {
        files: files
            .iter()
            .map(|file| InfoFile {
                length: file.length,
                path: segments(&file.relative),
            })
            .collect(),
        name: &name,
        piece_length,
        pieces: ByteBuf::from(pieces),
    };
    let encoded = serde_bencode::to_bytes(&info)?;

    let mut infohash = [0u8; 20];
    infohash.copy_from_slice(&Sha1::digest(&encoded));

    Ok(Descriptor {
        infohash: InfoHash::from_bytes(infohash),
        name,
        length,
        piece_length,
        files,
    })
}
