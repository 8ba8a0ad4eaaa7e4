//! Per-request routing between the cache path and the direct upstream path.

use crate::error::{PlaybackError, Result};
use crate::traits::{close_quietly, DataSource, DataSourceFactory, DataSpec, TransferListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Decides whether a request goes through the cache.
pub type CachePredicate = Arc<dyn Fn(&DataSpec) -> bool + Send + Sync>;

/// Predicate that caches every request.
pub fn cache_everything() -> CachePredicate {
    Arc::new(|_: &DataSpec| true)
}

/// Which path a bound source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Cache,
    Upstream,
}

enum SourceState {
    Unbound,
    Bound {
        source: Box<dyn DataSource>,
        route: Route,
    },
}

/// Source that picks the cache or upstream path on each `open()`.
///
/// Listeners added before `open()` are buffered and attached to whichever
/// source gets bound. A read-only violation on the cache path is retried once
/// directly against upstream.
pub struct ConditionalDataSource {
    cache_factory: Arc<dyn DataSourceFactory>,
    upstream_factory: Arc<dyn DataSourceFactory>,
    should_cache: CachePredicate,
    listeners: Vec<Arc<dyn TransferListener>>,
    state: SourceState,
}

impl ConditionalDataSource {
    pub fn new(
        cache_factory: Arc<dyn DataSourceFactory>,
        upstream_factory: Arc<dyn DataSourceFactory>,
        should_cache: CachePredicate,
    ) -> Self {
        Self {
            cache_factory,
            upstream_factory,
            should_cache,
            listeners: Vec::new(),
            state: SourceState::Unbound,
        }
    }

    /// Route of the bound source, `None` while unbound.
    pub fn route(&self) -> Option<Route> {
        match &self.state {
            SourceState::Unbound => None,
            SourceState::Bound { route, .. } => Some(*route),
        }
    }

    fn create(&self, route: Route) -> Box<dyn DataSource> {
        let mut source = match route {
            Route::Cache => self.cache_factory.create(),
            Route::Upstream => self.upstream_factory.create(),
        };
        for listener in &self.listeners {
            source.add_transfer_listener(Arc::clone(listener));
        }
        source
    }

    fn bound(&mut self) -> Result<&mut Box<dyn DataSource>> {
        match &mut self.state {
            SourceState::Bound { source, .. } => Ok(source),
            SourceState::Unbound => Err(PlaybackError::IllegalState(
                "data source used before open".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DataSource for ConditionalDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        if matches!(self.state, SourceState::Bound { .. }) {
            return Err(PlaybackError::IllegalState(
                "open on a data source that is already bound".to_string(),
            ));
        }

        let route = if (self.should_cache)(spec) {
            Route::Cache
        } else {
            Route::Upstream
        };
        debug!(?route, key = %spec.cache_key(), "Routing request");

        let mut source = self.create(route);
        match source.open(spec).await {
            Ok(length) => {
                self.state = SourceState::Bound { source, route };
                Ok(length)
            }
            Err(e) if route == Route::Cache && e.is_read_only_violation() => {
                info!(key = %spec.cache_key(), "Cache is read-only, reading upstream directly");
                close_quietly(source.as_mut()).await;

                let mut upstream = self.create(Route::Upstream);
                match upstream.open(spec).await {
                    Ok(length) => {
                        self.state = SourceState::Bound {
                            source: upstream,
                            route: Route::Upstream,
                        };
                        Ok(length)
                    }
                    Err(e) => {
                        close_quietly(upstream.as_mut()).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                close_quietly(source.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.bound()?.read(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SourceState::Unbound) {
            SourceState::Bound { mut source, .. } => source.close().await,
            SourceState::Unbound => Ok(()),
        }
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        if let SourceState::Bound { source, .. } = &mut self.state {
            source.add_transfer_listener(Arc::clone(&listener));
        }
        self.listeners.push(listener);
    }

    fn uri(&self) -> Option<&str> {
        match &self.state {
            SourceState::Bound { source, .. } => source.uri(),
            SourceState::Unbound => None,
        }
    }
}
