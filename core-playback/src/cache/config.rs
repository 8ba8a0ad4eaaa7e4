//! Cache configuration and budget

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default span file size when teeing upstream bytes into the cache (2 MiB).
pub const DEFAULT_FRAGMENT_SIZE: u64 = 2 * 1024 * 1024;

/// Name of the persisted metadata table inside the cache directory.
pub const INDEX_FILE_NAME: &str = "cache_index.json";

/// Byte budget of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLimit {
    /// Evict oldest spans once usage exceeds this many bytes.
    Bytes(u64),
    /// Never evict.
    Unlimited,
}

impl CacheLimit {
    /// Budget in bytes, `None` when unlimited.
    pub fn max_bytes(&self) -> Option<u64> {
        match self {
            CacheLimit::Bytes(bytes) => Some(*bytes),
            CacheLimit::Unlimited => None,
        }
    }

    /// Returns `true` if `used` bytes exceed the budget.
    pub fn is_exceeded_by(&self, used: u64) -> bool {
        self.max_bytes().is_some_and(|max| used > max)
    }
}

impl From<Option<u64>> for CacheLimit {
    fn from(bytes: Option<u64>) -> Self {
        bytes.map(CacheLimit::Bytes).unwrap_or(CacheLimit::Unlimited)
    }
}

/// Configuration for the byte-limited file store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding span files and the index
    pub directory: PathBuf,

    /// Byte budget (default: 512 MB)
    pub limit: CacheLimit,

    /// Maximum size of one span file written by the caching source (default: 2 MiB)
    pub fragment_size: u64,

    /// Reject every write with `ReadOnlyCache` (default: false)
    pub read_only: bool,

    /// Persist the metadata table as `cache_index.json` (default: true)
    pub persist_index: bool,
}

impl CacheConfig {
    /// Create a new cache configuration rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            limit: CacheLimit::Bytes(512 * 1024 * 1024),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            read_only: false,
            persist_index: true,
        }
    }

    /// Set the byte budget.
    pub fn with_limit(mut self, limit: CacheLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Set the budget in bytes.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.limit = CacheLimit::Bytes(bytes);
        self
    }

    /// Set the span file size used by the caching source.
    pub fn with_fragment_size(mut self, bytes: u64) -> Self {
        self.fragment_size = bytes;
        self
    }

    /// Open the store read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enable or disable index persistence.
    pub fn with_persist_index(mut self, persist: bool) -> Self {
        self.persist_index = persist;
        self
    }

    /// Path of the persisted index.
    pub fn index_path(&self) -> PathBuf {
        self.directory.join(INDEX_FILE_NAME)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.directory.as_os_str().is_empty() {
            return Err("directory cannot be empty".to_string());
        }

        if self.limit == CacheLimit::Bytes(0) {
            return Err("limit must be greater than 0 bytes".to_string());
        }

        if self.fragment_size == 0 {
            return Err("fragment_size must be greater than 0".to_string());
        }

        Ok(())
    }
}
