//! # Data Sources
//!
//! Implementations of [`DataSource`](crate::traits::DataSource): the HTTP
//! transport, the cache-backed source, and the decorators composed around them.
//!
//! | Source | Handles |
//! |--------|---------|
//! | [`ConditionalDataSource`] | routing between cache and upstream, read-only fallback |
//! | [`CacheDataSource`] | cache hits, cached prefixes, teeing upstream bytes into the store |
//! | [`FallbackDataSource`] | secondary transport, primary error preserved |
//! | [`RetryDataSource`] | transient `open()` failures with jittered backoff |
//! | [`RangeRecoveryDataSource`] | 416 / end-of-stream on ranged opens |
//! | [`ErrorClassifyingDataSource`] | mapping failures into [`ErrorClass`](crate::error::ErrorClass) |
//! | [`HttpDataSource`] | the raw `HttpClient` bridge |

pub mod cache;
pub mod classify;
pub mod conditional;
pub mod fallback;
pub mod http;
pub mod range_recovery;
pub mod retry;

pub use cache::CacheDataSource;
pub use classify::{classify, ErrorClassifyingDataSource};
pub use conditional::{cache_everything, CachePredicate, ConditionalDataSource, Route};
pub use fallback::{ActiveSource, FallbackDataSource};
pub use http::{HttpDataSource, HttpDataSourceFactory, IdentityResolver, UrlResolver};
pub use range_recovery::RangeRecoveryDataSource;
pub use retry::{RetryDataSource, RetryPolicy, RetryPredicate, RetryState};
