//! # HTTP Data Source
//!
//! The raw network transport at the bottom of every upstream chain. It turns a
//! [`DataSpec`] into one [`HttpClient::open_connection`] call and streams the
//! response body chunk by chunk.
//!
//! The source never retries and never classifies: a non-2xx status becomes
//! [`PlaybackError::InvalidResponseCode`] and bridge failures keep their
//! network-failure mapping, leaving decisions to the decorators above it.

use crate::datasource::range_recovery::RANGE_NOT_SATISFIABLE;
use crate::error::{PlaybackError, Result};
use crate::traits::{DataSource, DataSourceFactory, DataSpec, TransferListener};
use async_trait::async_trait;
use bridge_traits::http::{ByteStream, HttpClient, HttpRequest, RANGE_HEADER};
use bytes::Bytes;
use core_runtime::logging::redact_url;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const STATUS_OK: u16 = 200;

// ============================================================================
// URL Resolution
// ============================================================================

/// Maps a resource key to its currently valid fetch URL.
///
/// Consulted on every `open()`, so a resolver backed by a provider API hands out
/// a fresh URL after the previous one went stale.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, key: &str, uri: &str) -> Result<String>;
}

/// Fetches the request URI as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

#[async_trait]
impl UrlResolver for IdentityResolver {
    async fn resolve(&self, _key: &str, uri: &str) -> Result<String> {
        Ok(uri.to_string())
    }
}

// ============================================================================
// Data Source
// ============================================================================

struct OpenConnection {
    spec: DataSpec,
    uri: String,
    body: ByteStream,
    pending: Bytes,
    /// Leading bytes to drop when the server ignored `Range`.
    bytes_to_skip: u64,
    /// `None` when neither the request nor the response bounds the body.
    bytes_remaining: Option<u64>,
}

/// [`DataSource`] over the host [`HttpClient`] bridge.
pub struct HttpDataSource {
    client: Arc<dyn HttpClient>,
    resolver: Arc<dyn UrlResolver>,
    default_headers: HashMap<String, String>,
    listeners: Vec<Arc<dyn TransferListener>>,
    connection: Option<OpenConnection>,
}

impl HttpDataSource {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self::with_resolver(client, Arc::new(IdentityResolver))
    }

    pub fn with_resolver(client: Arc<dyn HttpClient>, resolver: Arc<dyn UrlResolver>) -> Self {
        Self {
            client,
            resolver,
            default_headers: HashMap::new(),
            listeners: Vec::new(),
            connection: None,
        }
    }

    /// Headers sent with every request; per-request headers override them.
    pub fn with_default_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    fn build_request(&self, spec: &DataSpec, uri: &str) -> HttpRequest {
        let request = HttpRequest::new(spec.method, uri)
            .headers(&self.default_headers)
            .headers(&spec.headers);

        if spec.header(RANGE_HEADER).is_some() {
            request
        } else {
            request.range(spec.position, spec.length)
        }
    }

    fn bind(&mut self, connection: OpenConnection) {
        for listener in &self.listeners {
            listener.on_transfer_start(&connection.spec);
        }
        self.connection = Some(connection);
    }
}

/// Number of bytes the open connection will deliver.
///
/// `available` is what the response announced after skipping, `requested` what
/// the spec asked for.
fn resolved_length(requested: Option<u64>, available: Option<u64>) -> Option<u64> {
    match (requested, available) {
        (Some(requested), Some(available)) => Some(requested.min(available)),
        (Some(requested), None) => Some(requested),
        (None, available) => available,
    }
}

fn stream_error(error: bridge_traits::BridgeError) -> PlaybackError {
    match PlaybackError::from(error) {
        PlaybackError::Bridge(e) => PlaybackError::StreamingFailed(e.to_string()),
        other => other,
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        if self.connection.is_some() {
            return Err(PlaybackError::IllegalState(
                "open on an HTTP source that is already open".to_string(),
            ));
        }
        if spec.cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }

        let uri = self.resolver.resolve(spec.cache_key(), &spec.uri).await?;
        let request = self.build_request(spec, &uri);
        debug!(
            uri = %redact_url(&uri),
            range = request.header_value(RANGE_HEADER).unwrap_or("none"),
            "Opening HTTP connection"
        );

        let response = tokio::select! {
            biased;
            _ = spec.cancel.cancelled() => return Err(PlaybackError::Cancelled),
            response = self.client.open_connection(request) => response?,
        };

        let explicit_range = spec.header(RANGE_HEADER).is_some();

        // A range starting exactly at the end of the resource is an empty read.
        if response.status == RANGE_NOT_SATISFIABLE
            && !explicit_range
            && spec.position > 0
            && response.content_range_total() == Some(spec.position)
        {
            debug!(position = spec.position, "Range starts at end of resource");
            self.bind(OpenConnection {
                spec: spec.clone(),
                uri,
                body: futures::stream::empty().boxed(),
                pending: Bytes::new(),
                bytes_to_skip: 0,
                bytes_remaining: Some(0),
            });
            return Ok(Some(0));
        }

        if !response.is_success() {
            return Err(PlaybackError::InvalidResponseCode {
                status: response.status,
                uri: redact_url(&uri),
            });
        }

        let bytes_to_skip = if response.status == STATUS_OK && !explicit_range {
            spec.position
        } else {
            0
        };
        let available = response
            .content_length()
            .map(|len| len.saturating_sub(bytes_to_skip));
        let length = resolved_length(spec.length, available);

        debug!(
            status = response.status,
            skip = bytes_to_skip,
            length = ?length,
            "HTTP connection open"
        );

        self.bind(OpenConnection {
            spec: spec.clone(),
            uri,
            body: response.body,
            pending: Bytes::new(),
            bytes_to_skip,
            bytes_remaining: length,
        });
        Ok(length)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Self {
            connection,
            listeners,
            ..
        } = self;
        let conn = connection.as_mut().ok_or_else(|| {
            PlaybackError::IllegalState("read on an HTTP source that is not open".to_string())
        })?;

        if buf.is_empty() || conn.bytes_remaining == Some(0) {
            return Ok(0);
        }

        loop {
            if conn.pending.is_empty() {
                let next = tokio::select! {
                    biased;
                    _ = conn.spec.cancel.cancelled() => return Err(PlaybackError::Cancelled),
                    next = conn.body.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        conn.pending = chunk;
                        continue;
                    }
                    Some(Err(e)) => return Err(stream_error(e)),
                    None if conn.bytes_to_skip > 0 || conn.bytes_remaining.is_some() => {
                        return Err(PlaybackError::EndOfStream)
                    }
                    None => return Ok(0),
                }
            }

            if conn.bytes_to_skip > 0 {
                let skip = conn.bytes_to_skip.min(conn.pending.len() as u64) as usize;
                let _ = conn.pending.split_to(skip);
                conn.bytes_to_skip -= skip as u64;
                continue;
            }

            let mut n = buf.len().min(conn.pending.len());
            if let Some(remaining) = conn.bytes_remaining {
                n = n.min(remaining as usize);
            }

            let chunk = conn.pending.split_to(n);
            buf[..n].copy_from_slice(&chunk);
            if let Some(remaining) = conn.bytes_remaining.as_mut() {
                *remaining -= n as u64;
            }

            for listener in listeners.iter() {
                listener.on_bytes_transferred(&conn.spec, n);
            }
            return Ok(n);
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.take() {
            for listener in &self.listeners {
                listener.on_transfer_end(&conn.spec);
            }
        }
        Ok(())
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.listeners.push(listener);
    }

    fn uri(&self) -> Option<&str> {
        self.connection.as_ref().map(|conn| conn.uri.as_str())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Hands out one [`HttpDataSource`] per request, sharing the client.
#[derive(Clone)]
pub struct HttpDataSourceFactory {
    client: Arc<dyn HttpClient>,
    resolver: Arc<dyn UrlResolver>,
    default_headers: HashMap<String, String>,
}

impl HttpDataSourceFactory {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            resolver: Arc::new(IdentityResolver),
            default_headers: HashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }
}

impl DataSourceFactory for HttpDataSourceFactory {
    fn create(&self) -> Box<dyn DataSource> {
        Box::new(
            HttpDataSource::with_resolver(Arc::clone(&self.client), Arc::clone(&self.resolver))
                .with_default_headers(self.default_headers.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_length() {
        assert_eq!(resolved_length(Some(100), Some(1000)), Some(100));
        assert_eq!(resolved_length(Some(100), Some(40)), Some(40));
        assert_eq!(resolved_length(Some(100), None), Some(100));
        assert_eq!(resolved_length(None, Some(40)), Some(40));
        assert_eq!(resolved_length(None, None), None);
    }

    #[test]
    fn test_stream_errors_keep_network_mapping() {
        use bridge_traits::BridgeError;

        assert!(matches!(
            stream_error(BridgeError::Timeout("read".to_string())),
            PlaybackError::Timeout(_)
        ));
        assert!(matches!(
            stream_error(BridgeError::OperationFailed("reset".to_string())),
            PlaybackError::StreamingFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_identity_resolver() {
        let uri = IdentityResolver
            .resolve("track-1", "https://cdn.example.com/a.webm")
            .await
            .unwrap();
        assert_eq!(uri, "https://cdn.example.com/a.webm");
    }
}
