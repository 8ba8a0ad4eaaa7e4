//! # Media Cache Data Sources
//!
//! Adaptive data-source layer between the playback pipeline and remote media.
//!
//! ## Overview
//!
//! This crate handles:
//! - A byte-budgeted on-disk cache of fetched spans ([`cache::ByteLimitedFileStore`])
//! - Per-request routing between the cache and upstream ([`datasource::ConditionalDataSource`])
//! - Recovery from rejected range requests, transient failures and dead primaries
//!   (range recovery, retry with jittered backoff, fallback)
//! - Classification of transport failures into [`ErrorClass`]
//! - The [`MediaCache`] facade used by settings and playback code

pub mod cache;
pub mod config;
pub mod datasource;
pub mod error;
pub mod factory;
pub mod traits;

pub use cache::{ByteLimitedFileStore, CacheConfig, CacheLimit, CacheStats, CacheStoreState};
pub use config::{RetryPolicy, RetryState};
pub use datasource::{cache_everything, CachePredicate, HttpDataSourceFactory, UrlResolver};
pub use error::{ErrorClass, PlaybackError, Result};
pub use factory::{create_data_source_factory, DataSourceFactoryBuilder, MediaCache};
pub use traits::{DataSource, DataSourceFactory, DataSpec, TransferListener};
