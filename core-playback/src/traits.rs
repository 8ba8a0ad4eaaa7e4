//! # Data Source Traits
//!
//! The contract shared by every stage of the media loading chain.
//!
//! ## Architecture
//!
//! A [`DataSource`] opens a byte range of a resource described by a [`DataSpec`],
//! is read until it reports end of input, then closed. Decorators (retry, range
//! recovery, fallback, classification, caching) each own one inner source and
//! forward whatever they do not handle, so they compose in any order:
//!
//! ```text
//! ConditionalDataSource
//!   ├── CacheDataSource ── upstream chain
//!   └── upstream chain: Fallback → Retry → RangeRecovery → Classify → HttpDataSource
//! ```
//!
//! ## Threading Model
//!
//! A source instance is driven by one task at a time (`&mut self`); it must be
//! `Send` so that task can migrate between worker threads. Factories are shared
//! (`Send + Sync`) and hand out a fresh source per request.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use core_playback::{DataSource, DataSpec};
//!
//! async fn read_all(source: &mut dyn DataSource, uri: &str) -> core_playback::Result<Vec<u8>> {
//!     let spec = DataSpec::new(uri);
//!     source.open(&spec).await?;
//!     let mut out = Vec::new();
//!     let mut buf = [0u8; 8192];
//!     loop {
//!         let n = source.read(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         out.extend_from_slice(&buf[..n]);
//!     }
//!     source.close().await?;
//!     Ok(out)
//! }
//! ```

use crate::error::Result;
use async_trait::async_trait;
use bridge_traits::http::{HttpMethod, RANGE_HEADER};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Request Descriptor
// ============================================================================

/// Describes one logical read request.
///
/// `length == None` means "to the end of the resource".
#[derive(Debug, Clone)]
pub struct DataSpec {
    /// Fetch URI (may be re-resolved by the transport).
    pub uri: String,
    /// Stable cache key; defaults to the URI.
    pub key: Option<String>,
    pub method: HttpMethod,
    /// Extra request headers, possibly including an explicit `Range`.
    pub headers: HashMap<String, String>,
    /// Absolute offset of the first requested byte.
    pub position: u64,
    /// Number of requested bytes, `None` if unbounded.
    pub length: Option<u64>,
    /// Cancelled by the host when the request is abandoned.
    pub cancel: CancellationToken,
}

impl DataSpec {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            key: None,
            method: HttpMethod::Get,
            headers: HashMap::new(),
            position: 0,
            length: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_range(mut self, position: u64, length: Option<u64>) -> Self {
        self.position = position;
        self.length = length;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Key used for cache lookups.
    pub fn cache_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.uri)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if the request asks for less than the whole resource.
    pub fn is_ranged(&self) -> bool {
        self.position > 0 || self.length.is_some() || self.header(RANGE_HEADER).is_some()
    }

    /// The same request starting `offset` bytes later.
    ///
    /// A non-zero offset drops any explicit `Range` header, which would otherwise
    /// still name the original start, so `position` and `length` drive the range.
    pub fn subrange(&self, offset: u64) -> Self {
        let mut spec = self.clone();
        if offset > 0 {
            spec.headers
                .retain(|name, _| !name.eq_ignore_ascii_case(RANGE_HEADER));
        }
        spec.position = self.position + offset;
        spec.length = self.length.map(|len| len.saturating_sub(offset));
        spec
    }

    /// The same request with any explicit `Range` header removed and an unbounded length.
    pub fn without_range(&self) -> Self {
        let mut spec = self.clone();
        spec.headers
            .retain(|name, _| !name.eq_ignore_ascii_case(RANGE_HEADER));
        spec.length = None;
        spec
    }

    /// Absolute end offset (exclusive) when the length is known.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.position + len)
    }
}

// ============================================================================
// Transfer Listener
// ============================================================================

/// Observer of bytes moving through a source.
///
/// All methods default to no-ops.
pub trait TransferListener: Send + Sync {
    fn on_transfer_start(&self, _spec: &DataSpec) {}

    fn on_bytes_transferred(&self, _spec: &DataSpec, _bytes: usize) {}

    fn on_transfer_end(&self, _spec: &DataSpec) {}
}

// ============================================================================
// Data Source
// ============================================================================

/// A readable byte range of a remote or cached resource.
#[async_trait]
pub trait DataSource: Send {
    /// Open the span described by `spec`.
    ///
    /// Returns the number of bytes that will be delivered, or `None` if unknown.
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>>;

    /// Read up to `buf.len()` bytes. `Ok(0)` signals end of input.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the underlying resources. Safe to call on an unopened source.
    async fn close(&mut self) -> Result<()>;

    /// Register a listener; decorators forward it to their inner source.
    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>);

    /// URI of the currently open resource.
    fn uri(&self) -> Option<&str>;
}

/// Creates a fresh [`DataSource`] per request.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn DataSource>;
}

impl<F> DataSourceFactory for F
where
    F: Fn() -> Box<dyn DataSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn DataSource> {
        self()
    }
}

/// Close `source` after a failed open, logging instead of masking the original error.
pub(crate) async fn close_quietly(source: &mut dyn DataSource) {
    if let Err(e) = source.close().await {
        tracing::debug!(error = %e, "Ignoring close failure after failed open");
    }
}
