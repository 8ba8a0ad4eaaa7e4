//! # Data Source Factories
//!
//! Composition of the data-source chain and the [`MediaCache`] facade handed to
//! the rest of the application.
//!
//! ```text
//! ConditionalDataSourceFactory
//!   ├── CacheDataSourceFactory ── UpstreamFactory
//!   └── UpstreamFactory:
//!         Fallback? → Retry → RangeRecovery → Classify → transport
//! ```

use crate::cache::{ByteLimitedFileStore, CacheConfig, CacheLimit, CacheStats};
use crate::config::RetryPolicy;
use crate::datasource::{
    cache_everything, CacheDataSource, CachePredicate, ConditionalDataSource,
    ErrorClassifyingDataSource, FallbackDataSource, HttpDataSourceFactory,
    RangeRecoveryDataSource, RetryDataSource, RetryPredicate, UrlResolver,
};
use crate::datasource::retry::default_predicate;
use crate::error::{PlaybackError, Result};
use crate::traits::{DataSource, DataSourceFactory};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_runtime::config::CoreConfig;
use std::sync::Arc;
use tracing::{info, instrument};

// ============================================================================
// Upstream Chain
// ============================================================================

/// Builds `Fallback? → Retry → RangeRecovery → Classify → transport` per request.
pub struct UpstreamFactory {
    transport: Arc<dyn DataSourceFactory>,
    fallback: Option<Arc<dyn DataSourceFactory>>,
    policy: RetryPolicy,
    predicate: RetryPredicate,
}

impl UpstreamFactory {
    pub fn new(transport: Arc<dyn DataSourceFactory>) -> Self {
        Self {
            transport,
            fallback: None,
            policy: RetryPolicy::default(),
            predicate: default_predicate(),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn DataSourceFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    fn chain(&self, transport: &Arc<dyn DataSourceFactory>) -> Box<dyn DataSource> {
        let classified = Box::new(ErrorClassifyingDataSource::new(transport.create()));
        let recovering = Box::new(RangeRecoveryDataSource::new(classified));
        Box::new(RetryDataSource::with_predicate(
            recovering,
            self.policy.clone(),
            Arc::clone(&self.predicate),
        ))
    }
}

impl DataSourceFactory for UpstreamFactory {
    fn create(&self) -> Box<dyn DataSource> {
        let primary = self.chain(&self.transport);
        match &self.fallback {
            Some(fallback) => Box::new(FallbackDataSource::new(primary, self.chain(fallback))),
            None => primary,
        }
    }
}

// ============================================================================
// Cache and Conditional Factories
// ============================================================================

/// Hands out [`CacheDataSource`]s over one shared store.
pub struct CacheDataSourceFactory {
    store: ByteLimitedFileStore,
    upstream: Arc<dyn DataSourceFactory>,
    fragment_size: u64,
}

impl CacheDataSourceFactory {
    pub fn new(store: ByteLimitedFileStore, upstream: Arc<dyn DataSourceFactory>) -> Self {
        let fragment_size = store.fragment_size();
        Self {
            store,
            upstream,
            fragment_size,
        }
    }

    pub fn with_fragment_size(mut self, fragment_size: u64) -> Self {
        self.fragment_size = fragment_size;
        self
    }
}

impl DataSourceFactory for CacheDataSourceFactory {
    fn create(&self) -> Box<dyn DataSource> {
        Box::new(
            CacheDataSource::new(self.store.clone(), self.upstream.create())
                .with_fragment_size(self.fragment_size),
        )
    }
}

/// Hands out [`ConditionalDataSource`]s.
pub struct ConditionalDataSourceFactory {
    cache: Arc<dyn DataSourceFactory>,
    upstream: Arc<dyn DataSourceFactory>,
    should_cache: CachePredicate,
}

impl ConditionalDataSourceFactory {
    pub fn new(
        cache: Arc<dyn DataSourceFactory>,
        upstream: Arc<dyn DataSourceFactory>,
        should_cache: CachePredicate,
    ) -> Self {
        Self {
            cache,
            upstream,
            should_cache,
        }
    }
}

impl DataSourceFactory for ConditionalDataSourceFactory {
    fn create(&self) -> Box<dyn DataSource> {
        Box::new(ConditionalDataSource::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.upstream),
            Arc::clone(&self.should_cache),
        ))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles the full chain around a store and a raw transport.
pub struct DataSourceFactoryBuilder {
    store: ByteLimitedFileStore,
    transport: Arc<dyn DataSourceFactory>,
    fallback: Option<Arc<dyn DataSourceFactory>>,
    should_cache: CachePredicate,
    policy: RetryPolicy,
    predicate: RetryPredicate,
    fragment_size: u64,
}

impl DataSourceFactoryBuilder {
    pub fn new(store: ByteLimitedFileStore, transport: Arc<dyn DataSourceFactory>) -> Self {
        let fragment_size = store.fragment_size();
        Self {
            store,
            transport,
            fallback: None,
            should_cache: cache_everything(),
            policy: RetryPolicy::default(),
            predicate: default_predicate(),
            fragment_size,
        }
    }

    pub fn cache_predicate(mut self, should_cache: CachePredicate) -> Self {
        self.should_cache = should_cache;
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn DataSourceFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn fragment_size(mut self, fragment_size: u64) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Build the factory.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidConfig`] for an out-of-range retry policy or a zero
    /// fragment size.
    pub fn build(self) -> Result<Arc<dyn DataSourceFactory>> {
        self.policy
            .validate()
            .map_err(|e| PlaybackError::InvalidConfig(format!("retry policy: {}", e)))?;
        if self.fragment_size == 0 {
            return Err(PlaybackError::InvalidConfig(
                "fragment size must be greater than 0".to_string(),
            ));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Arc<dyn DataSourceFactory> {
        let mut upstream = UpstreamFactory::new(self.transport)
            .with_retry_policy(self.policy)
            .with_retry_predicate(self.predicate);
        if let Some(fallback) = self.fallback {
            upstream = upstream.with_fallback(fallback);
        }
        let upstream: Arc<dyn DataSourceFactory> = Arc::new(upstream);

        let cache: Arc<dyn DataSourceFactory> = Arc::new(
            CacheDataSourceFactory::new(self.store, Arc::clone(&upstream))
                .with_fragment_size(self.fragment_size),
        );

        Arc::new(ConditionalDataSourceFactory::new(
            cache,
            upstream,
            self.should_cache,
        ))
    }
}

/// Compose the default chain: conditional routing, read-through caching, and
/// retry, range recovery and classification around `upstream`.
pub fn create_data_source_factory(
    store: &ByteLimitedFileStore,
    upstream: Arc<dyn DataSourceFactory>,
    should_cache: CachePredicate,
) -> Arc<dyn DataSourceFactory> {
    DataSourceFactoryBuilder::new(store.clone(), upstream)
        .cache_predicate(should_cache)
        .assemble()
}

// ============================================================================
// Facade
// ============================================================================

/// Owns the cache store and builds data-source factories over it.
///
/// This is the surface the settings screens and the playback pipeline use:
/// factory creation, size queries, budget changes, clearing and per-item
/// cached indicators.
///
/// # Example
///
/// ```rust,ignore
/// let cache = MediaCache::from_core_config(&core_config).await?;
/// let factory = cache.create_data_source_factory(cache_everything());
///
/// let mut source = factory.create();
/// source.open(&DataSpec::new(url).with_key("track-1")).await?;
///
/// println!("{} cached", cache.stats().size_string());
/// ```
#[derive(Clone)]
pub struct MediaCache {
    store: ByteLimitedFileStore,
    transport: Arc<dyn DataSourceFactory>,
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCache")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl MediaCache {
    /// Open the store described by `config` with `transport` as raw upstream.
    pub async fn load(
        config: CacheConfig,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn DataSourceFactory>,
    ) -> Result<Self> {
        let store = ByteLimitedFileStore::load(config, fs, clock).await?;
        Ok(Self { store, transport })
    }

    /// Open the cache with the bridges and settings of a [`CoreConfig`].
    ///
    /// The raw transport is an HTTP source over `config.http_client`.
    #[instrument(skip(config), fields(cache_dir = ?config.cache_dir))]
    pub async fn from_core_config(config: &CoreConfig) -> Result<Self> {
        Self::from_core_config_with_resolver(config, None).await
    }

    /// Like [`from_core_config`](Self::from_core_config), resolving fetch URLs
    /// through `resolver`.
    pub async fn from_core_config_with_resolver(
        config: &CoreConfig,
        resolver: Option<Arc<dyn UrlResolver>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PlaybackError::InvalidConfig(e.to_string()))?;

        let cache_config = CacheConfig::new(config.cache_dir.clone())
            .with_limit(CacheLimit::from(config.cache_max_bytes));

        let mut http = HttpDataSourceFactory::new(Arc::clone(&config.http_client));
        if let Some(resolver) = resolver {
            http = http.with_resolver(resolver);
        }

        let cache = Self::load(
            cache_config,
            Arc::clone(&config.file_system),
            Arc::clone(&config.clock),
            Arc::new(http),
        )
        .await?;
        info!(size = cache.store.size(), "Media cache ready");
        Ok(cache)
    }

    pub fn store(&self) -> &ByteLimitedFileStore {
        &self.store
    }

    /// Builder preloaded with this cache's store and transport.
    pub fn factory_builder(&self) -> DataSourceFactoryBuilder {
        DataSourceFactoryBuilder::new(self.store.clone(), Arc::clone(&self.transport))
    }

    /// Factory with default retry settings and `should_cache` routing.
    pub fn create_data_source_factory(
        &self,
        should_cache: CachePredicate,
    ) -> Arc<dyn DataSourceFactory> {
        create_data_source_factory(&self.store, Arc::clone(&self.transport), should_cache)
    }

    /// Bytes currently used.
    pub fn cache_size(&self) -> u64 {
        self.store.size()
    }

    /// Change the budget, evicting immediately if usage exceeds it.
    #[instrument(skip(self))]
    pub async fn set_cache_max_size(&self, limit: CacheLimit) -> Result<()> {
        self.store.set_max_size(limit).await
    }

    /// Remove every cached span.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Returns `true` iff `[position, position + length)` of `key` is cached.
    pub fn is_cached(&self, key: &str, position: u64, length: Option<u64>) -> bool {
        self.store.is_cached(key, position, length)
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Persist pending index changes.
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}
