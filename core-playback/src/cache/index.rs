//! Persisted metadata table (`cache_index.json`)
//!
//! The index is rewritten as a whole: serialized to `<index>.tmp`, then renamed
//! over the previous version so a crash leaves either the old or the new table.

use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current on-disk format.
pub const INDEX_VERSION: u32 = 1;

/// Suffix of files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Suffix of committed span files.
pub const SPAN_SUFFIX: &str = ".span";

/// On-disk form of the store's metadata table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    pub version: u32,
    #[serde(default)]
    pub next_span_id: u64,
    #[serde(default)]
    pub spans: Vec<IndexedSpan>,
    /// Known total resource lengths by key.
    #[serde(default)]
    pub content_lengths: BTreeMap<String, u64>,
}

/// One cached span as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSpan {
    pub id: u64,
    pub key: String,
    pub position: u64,
    pub length: u64,
    /// File name relative to the cache directory.
    pub file: String,
    /// Unix millis of the last read or write.
    pub last_access: i64,
}

/// Hex digest used to keep arbitrary keys out of file names.
pub fn key_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..16])
}

/// File name of a span: `<digest>.<position>.<id>.span`.
pub fn span_file_name(key: &str, position: u64, id: u64) -> String {
    format!("{}.{}.{}{}", key_digest(key), position, id, SPAN_SUFFIX)
}

/// Temp path written before `path` is committed by rename.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Load the index at `path`.
///
/// A missing, unreadable or corrupt index yields `None`; the store then starts
/// empty and the directory sweep removes the unreferenced span files.
pub async fn load(fs: &dyn FileSystemAccess, path: &Path) -> Option<IndexFile> {
    match fs.exists(path).await {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            warn!(error = %e, "Failed to check for cache index");
            return None;
        }
    }

    let raw = match fs.read_file(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to read cache index");
            return None;
        }
    };

    match serde_json::from_slice::<IndexFile>(&raw) {
        Ok(index) if index.version == INDEX_VERSION => {
            debug!(spans = index.spans.len(), "Loaded cache index");
            Some(index)
        }
        Ok(index) => {
            warn!(version = index.version, "Ignoring cache index with unknown version");
            None
        }
        Err(e) => {
            warn!(error = %e, "Ignoring corrupt cache index");
            None
        }
    }
}

/// Atomically replace the index at `path`.
pub async fn persist(fs: &dyn FileSystemAccess, path: &Path, index: &IndexFile) -> Result<()> {
    let encoded = serde_json::to_vec(index)
        .map_err(|e| PlaybackError::CacheError(format!("Failed to encode cache index: {}", e)))?;

    let tmp = temp_path(path);
    fs.write_file(&tmp, Bytes::from(encoded))
        .await
        .map_err(|e| PlaybackError::CacheError(format!("Failed to write cache index: {}", e)))?;

    if let Err(e) = fs.rename(&tmp, path).await {
        let _ = fs.delete_file(&tmp).await;
        return Err(PlaybackError::CacheError(format!(
            "Failed to commit cache index: {}",
            e
        )));
    }

    Ok(())
}
