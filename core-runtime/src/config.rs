//! # Core Configuration Module
//!
//! Provides configuration management for the media cache core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the injected host capabilities and the cache settings.
//! It enforces fail-fast validation so a missing transport or file system is
//! reported at startup instead of on the first playback request.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Raw streaming transport (desktop default: reqwest)
//! - `FileSystemAccess` - Cache file I/O (desktop default: tokio fs)
//!
//! ## Optional Dependencies
//!
//! - `Clock` - Time source for recency ordering (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! `HttpClient` and `FileSystemAccess` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .cache_size_mb(512)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ### Configuration with Custom Bridges
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .unlimited_cache()
//!     .http_client(Arc::new(MyHttpClient))
//!     .file_system(Arc::new(MyFileSystem))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, SystemClock, TransportConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Largest accepted cache budget (100 GB).
const MAX_CACHE_SIZE_MB: u64 = 100_000;

/// Core configuration for the media cache.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory for span files and the cache index
    pub cache_dir: PathBuf,

    /// Cache budget in bytes; `None` disables eviction
    pub cache_max_bytes: Option<u64>,

    /// Transport timeouts, redirect policy and User-Agent
    pub transport: TransportConfig,

    /// Raw HTTP transport
    pub http_client: Arc<dyn HttpClient>,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Time source used for cache recency
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("cache_max_bytes", &self.cache_max_bytes)
            .field("transport", &self.transport)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Cache budget is reasonable (> 0 and <= 100GB) when limited
    /// - Transport timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if let Some(max_bytes) = self.cache_max_bytes {
            if max_bytes == 0 {
                return Err(Error::Config(
                    "Cache size must be greater than 0 bytes (use unlimited_cache() to disable eviction)"
                        .to_string(),
                ));
            }

            if max_bytes > MAX_CACHE_SIZE_MB * 1024 * 1024 {
                return Err(Error::Config(
                    "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
                ));
            }
        }

        if self.transport.connect_timeout.is_zero() || self.transport.read_timeout.is_zero() {
            return Err(Error::Config(
                "Transport timeouts must be greater than zero".to_string(),
            ));
        }

        if self.transport.user_agent.trim().is_empty() {
            return Err(Error::Config("User-Agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for streaming. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Mobile: inject the platform-native HTTP stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the media cache. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Mobile: inject sandboxed app-cache storage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(transport: &TransportConfig) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::from_config(transport).map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_transport: &TransportConfig) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    Ok(Arc::new(TokioFileSystem::with_cache_dir(cache_dir.to_path_buf())))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    cache_max_bytes: Option<u64>,
    unlimited: bool,
    transport: Option<TransportConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the cache directory (required).
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the cache budget in megabytes (default: 1024 MB).
    pub fn cache_size_mb(mut self, size_mb: u64) -> Self {
        self.cache_max_bytes = Some(size_mb.saturating_mul(1024 * 1024));
        self.unlimited = false;
        self
    }

    /// Sets the cache budget in bytes.
    pub fn cache_max_bytes(mut self, bytes: u64) -> Self {
        self.cache_max_bytes = Some(bytes);
        self.unlimited = false;
        self
    }

    /// Disables eviction entirely.
    pub fn unlimited_cache(mut self) -> Self {
        self.cache_max_bytes = None;
        self.unlimited = true;
        self
    }

    /// Overrides the transport settings.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Injects the HTTP transport.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Injects the file system implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Injects the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the configuration, filling platform defaults and validating.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the cache directory is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no default exists
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Call cache_dir() on the builder.".to_string())
        })?;

        let transport = self.transport.unwrap_or_default();

        let cache_max_bytes = if self.unlimited {
            None
        } else {
            Some(self.cache_max_bytes.unwrap_or(1024 * 1024 * 1024))
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&transport)?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir)?,
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let config = CoreConfig {
            cache_dir,
            cache_max_bytes,
            transport,
            http_client,
            file_system,
            clock,
        };

        config.validate()?;
        Ok(config)
    }
}
