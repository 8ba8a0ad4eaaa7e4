//! HTTP Transport Abstraction
//!
//! Provides the raw, non-retrying HTTP capability the media pipeline streams from.
//! Retry, range recovery and error classification are layered on top by the core;
//! implementations only open a connection and hand back status, headers and a body
//! stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Header carrying the byte range of a partial request.
pub const RANGE_HEADER: &str = "Range";

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Request the span `[position, position + length)`, or everything from
    /// `position` when `length` is `None`.
    ///
    /// A request for the whole resource (`0..`) sends no `Range` header at all.
    pub fn range(self, position: u64, length: Option<u64>) -> Self {
        match (position, length) {
            (0, None) => self,
            (_, Some(0)) => self.header(RANGE_HEADER, format!("bytes={}-{}", position, position)),
            (p, None) => self.header(RANGE_HEADER, format!("bytes={}-", p)),
            (p, Some(len)) => self.header(RANGE_HEADER, format!("bytes={}-{}", p, p + len - 1)),
        }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Streaming response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// HTTP response with a lazily consumed body.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"ByteStream { ... }")
            .finish()
    }
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Body length announced by `Content-Length`.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// Complete resource length from a `Content-Range: bytes a-b/total` header.
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.header("Content-Range")?;
        let (_, total) = value.rsplit_once('/')?;
        total.trim().parse().ok()
    }
}

/// Transport settings applied by the host's HTTP implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Deadline for establishing the connection (default: 20s)
    pub connect_timeout: Duration,
    /// Deadline between body reads (default: 30s)
    pub read_timeout: Duration,
    /// Follow HTTP redirects (default: true)
    pub follow_redirects: bool,
    /// Maximum number of redirects followed
    pub max_redirects: usize,
    /// Fixed User-Agent sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            max_redirects: 10,
            user_agent: format!("media-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

/// Raw HTTP transport trait
///
/// Implementations must NOT retry and must NOT treat non-2xx statuses as errors:
/// every response that arrives is returned with its status so the core can classify
/// it. Errors are reserved for failures where no response was received
/// (timeouts, DNS/connection failures, TLS errors).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest, HttpMethod};
///
/// async fn probe(client: &dyn HttpClient) -> Result<u16> {
///     let request = HttpRequest::new(HttpMethod::Get, "https://cdn.example.com/a.webm")
///         .range(0, Some(1024));
///     Ok(client.open_connection(request).await?.status)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Open a connection and return once the status line and headers arrived.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Connect timeout elapses
    async fn open_connection(&self, request: HttpRequest) -> Result<HttpResponse>;
}
