//! Workspace facade crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `media-cache` alone. The `desktop-shims` feature (on by default) pulls in the
//! reqwest/tokio bridge implementations and lets `CoreConfig::builder()` fall
//! back to them when no bridges are injected.
//!
//! ```rust,ignore
//! use media_cache::playback::{cache_everything, DataSpec, MediaCache};
//! use media_cache::runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/var/cache/player")
//!     .cache_size_mb(512)
//!     .build()?;
//! let cache = MediaCache::from_core_config(&config).await?;
//! let factory = cache.create_data_source_factory(cache_everything());
//! ```

pub use bridge_traits as bridge;
pub use core_playback as playback;
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
