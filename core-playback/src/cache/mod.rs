//! # Media Cache Module
//!
//! Byte-budgeted on-disk storage of previously fetched resource spans.
//!
//! ## Overview
//!
//! Key features:
//! - Persistent storage through the `FileSystemAccess` bridge (one file per span)
//! - Oldest-access-first eviction against a configurable byte budget
//! - Reader leases that keep spans from being evicted mid-read
//! - Metadata table persisted as JSON and validated on reload
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     ByteLimitedFileStore               │
//! │  - is_cached() / open()                │
//! │  - write() / clear() / set_max_size()  │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> Table (spans, CacheStoreState) behind one lock
//!          ├──> FileSystemAccess (span files, cache_index.json)
//!          └──> Clock (access times for eviction order)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{ByteLimitedFileStore, CacheConfig, CacheLimit};
//!
//! # async fn example(fs: Arc<dyn FileSystemAccess>, clock: Arc<dyn Clock>) -> core_playback::Result<()> {
//! let store = ByteLimitedFileStore::load(CacheConfig::new("/tmp/media"), fs, clock).await?;
//!
//! store.write("track-1", 0, bytes::Bytes::from_static(b"abc")).await?;
//! if store.is_cached("track-1", 0, Some(3)) {
//!     let mut reader = store.open("track-1", 0, Some(3))?;
//!     let data = reader.read_to_end().await?;
//! }
//!
//! store.set_max_size(CacheLimit::Bytes(256 * 1024 * 1024)).await?;
//! println!("Cache size: {}", store.stats().size_string());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod index;
pub mod reader;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use config::{CacheConfig, CacheLimit, DEFAULT_FRAGMENT_SIZE, INDEX_FILE_NAME};
pub use reader::CachedSpanReader;
pub use stats::{CacheStats, CacheStoreState};
pub use store::{ByteLimitedFileStore, SpanId};
