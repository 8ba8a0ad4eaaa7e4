//! # Playback Error Types
//!
//! Error types for the media data-source chain and the on-disk cache.
//!
//! Transport failures are folded into a small taxonomy ([`ErrorClass`]) by the
//! classifying decorator so the retry and fallback layers can make decisions
//! without knowing anything about the underlying HTTP stack.

use bridge_traits::BridgeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of data-source failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A later attempt may succeed (timeouts, 429, 5xx).
    Transient,
    /// The fetch URL went stale; the caller must resolve a fresh one.
    NeedsStreamRefresh,
    /// Surface to the user, never retry.
    Unrecoverable,
    /// No richer classification applies.
    Unknown,
}

/// Errors that can occur while opening or reading media data.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Upstream answered with a non-2xx status.
    #[error("Invalid response code {status} for {uri}")]
    InvalidResponseCode { status: u16, uri: String },

    /// Connect or read deadline elapsed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// DNS resolution or connection establishment failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Input ended before the announced length was delivered.
    #[error("Unexpected end of stream")]
    EndOfStream,

    /// Body stream failed after the connection was established.
    #[error("Streaming failed: {0}")]
    StreamingFailed(String),

    /// A transport error tagged with its class.
    #[error("{class:?} failure: {source}")]
    Classified {
        class: ErrorClass,
        #[source]
        source: Box<PlaybackError>,
    },

    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Requested span is not fully covered by the cache.
    #[error("Not cached: {0}")]
    NotCached(String),

    /// The cache would have to be written but only reads are permitted.
    #[error("Cache is read-only: {0}")]
    ReadOnlyCache(String),

    /// A single write is larger than the whole cache budget.
    #[error("Cache storage full: {requested} bytes requested, budget is {max_bytes} bytes")]
    CacheFull { requested: u64, max_bytes: u64 },

    /// Cache storage operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Operation invoked in a state that does not allow it (e.g. read before open).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A policy or configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Host bridge failure without a more specific mapping.
    #[error("Bridge error: {0}")]
    Bridge(#[source] BridgeError),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BridgeError> for PlaybackError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Timeout(msg) => PlaybackError::Timeout(msg),
            BridgeError::ConnectionFailed(msg) => PlaybackError::ConnectionFailed(msg),
            BridgeError::Io(e) => PlaybackError::IoError(e),
            other => PlaybackError::Bridge(other),
        }
    }
}

impl PlaybackError {
    /// Wrap `error` with a classification. Already classified errors keep their class.
    pub fn classified(class: ErrorClass, error: PlaybackError) -> Self {
        match error {
            already @ PlaybackError::Classified { .. } => already,
            other => PlaybackError::Classified {
                class,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through classification wrappers.
    pub fn root(&self) -> &PlaybackError {
        match self {
            PlaybackError::Classified { source, .. } => source.root(),
            other => other,
        }
    }

    /// Class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PlaybackError::Classified { class, .. } => *class,
            PlaybackError::IllegalState(_) => ErrorClass::Unrecoverable,
            _ => ErrorClass::Unknown,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self.root() {
            PlaybackError::InvalidResponseCode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for timeouts and connection failures.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self.root(),
            PlaybackError::Timeout(_) | PlaybackError::ConnectionFailed(_)
        )
    }

    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
            || self.is_network_failure()
            || matches!(self.root(), PlaybackError::StreamingFailed(_))
    }

    /// Returns `true` if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), PlaybackError::Cancelled)
    }

    /// Returns `true` if input ended early.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.root(), PlaybackError::EndOfStream)
    }

    /// Returns `true` for a write attempted against a read-only cache.
    pub fn is_read_only_violation(&self) -> bool {
        matches!(self.root(), PlaybackError::ReadOnlyCache(_))
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
