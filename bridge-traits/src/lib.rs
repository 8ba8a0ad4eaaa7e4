//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the media cache core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Raw streaming HTTP transport (no retry)
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the on-disk cache
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report timeouts as [`BridgeError::Timeout`] and DNS/connect failures as
//!   [`BridgeError::ConnectionFailed`] so the core can classify them as transient
//! - Include error context (e.g., file paths, hosts)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient;
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn open_connection(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, TransportConfig};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
