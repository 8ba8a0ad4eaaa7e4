//! # Cache Data Source
//!
//! Serves requests from a [`ByteLimitedFileStore`] and fills it from upstream.
//!
//! ```text
//! open(spec)
//!   ├── fully cached            -> CachedSpanReader only
//!   ├── cached prefix [p, p+n)  -> CachedSpanReader, then upstream at p+n (teed)
//!   └── nothing cached          -> upstream at p (teed)
//! ```
//!
//! Upstream bytes are buffered and written to the store in fragments of
//! `fragment_size`. A failed write stops caching for the rest of the request but
//! never fails the read itself.

use crate::cache::{ByteLimitedFileStore, CachedSpanReader};
use crate::error::{PlaybackError, Result};
use crate::traits::{close_quietly, DataSource, DataSpec, TransferListener};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upstream bytes waiting to be written.
struct Tee {
    /// Absolute offset of `buffer[0]`.
    position: u64,
    buffer: BytesMut,
}

struct OpenRead {
    spec: DataSpec,
    key: String,
    cached: Option<CachedSpanReader>,
    upstream_open: bool,
    tee: Option<Tee>,
    /// Absolute offset of the next byte handed to the caller.
    position: u64,
    /// Resource length learned from upstream, recorded once bytes are cached.
    content_length: Option<u64>,
}

impl OpenRead {
    /// Write out the tee and record the resource length against what landed.
    async fn finish_tee(&mut self, store: &ByteLimitedFileStore, fragment_size: u64) {
        flush_tee(store, &self.key, &mut self.tee, fragment_size, true).await;
        if let Some(length) = self.content_length {
            store.set_content_length(&self.key, length);
        }
    }
}

/// [`DataSource`] that reads through the cache.
pub struct CacheDataSource {
    store: ByteLimitedFileStore,
    upstream: Box<dyn DataSource>,
    fragment_size: u64,
    listeners: Vec<Arc<dyn TransferListener>>,
    state: Option<OpenRead>,
}

impl CacheDataSource {
    pub fn new(store: ByteLimitedFileStore, upstream: Box<dyn DataSource>) -> Self {
        let fragment_size = store.fragment_size();
        Self {
            store,
            upstream,
            fragment_size,
            listeners: Vec::new(),
            state: None,
        }
    }

    /// Size of each span file written from upstream bytes.
    pub fn with_fragment_size(mut self, fragment_size: u64) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    /// Returns `true` while the current request still writes to the store.
    pub fn is_caching(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.tee.is_some())
    }
}

fn notify_bytes(listeners: &[Arc<dyn TransferListener>], spec: &DataSpec, bytes: usize) {
    for listener in listeners {
        listener.on_bytes_transferred(spec, bytes);
    }
}

/// Write buffered bytes to the store.
///
/// Only whole fragments are written unless `drain` is set. On failure the tee is
/// dropped and the request continues uncached.
async fn flush_tee(
    store: &ByteLimitedFileStore,
    key: &str,
    tee: &mut Option<Tee>,
    fragment_size: u64,
    drain: bool,
) {
    let fragment_size = fragment_size as usize;
    while let Some(t) = tee.as_mut() {
        let len = t.buffer.len();
        if len == 0 || (len < fragment_size && !drain) {
            return;
        }

        let chunk = t.buffer.split_to(len.min(fragment_size)).freeze();
        let position = t.position;
        t.position += chunk.len() as u64;

        if let Err(e) = store.write(key, position, chunk).await {
            warn!(key = %key, position, error = %e, "Cache write failed, continuing uncached");
            *tee = None;
        }
    }
}

#[async_trait]
impl DataSource for CacheDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        if self.state.is_some() {
            return Err(PlaybackError::IllegalState(
                "open on a cache source that is already open".to_string(),
            ));
        }
        if spec.cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }

        let key = spec.cache_key().to_string();

        if let Some(reader) = self.store.try_open(&key, spec.position, spec.length) {
            let length = reader.length();
            debug!(key = %key, position = spec.position, length, "Serving from cache");
            for listener in &self.listeners {
                listener.on_transfer_start(spec);
            }
            self.state = Some(OpenRead {
                spec: spec.clone(),
                key,
                cached: Some(reader),
                upstream_open: false,
                tee: None,
                position: spec.position,
                content_length: None,
            });
            return Ok(Some(length));
        }

        if self.store.is_read_only() {
            return Err(PlaybackError::ReadOnlyCache(format!(
                "{} is not cached at {}",
                key, spec.position
            )));
        }

        let cached = self.store.open_prefix(&key, spec.position, spec.length);
        let prefix = cached.as_ref().map_or(0, CachedSpanReader::length);

        let upstream_spec = spec.subrange(prefix);
        let upstream_length = match self.upstream.open(&upstream_spec).await {
            Ok(length) => length,
            Err(e) => {
                close_quietly(self.upstream.as_mut()).await;
                return Err(e);
            }
        };

        let content_length = if spec.length.is_none() {
            upstream_length.map(|remaining| upstream_spec.position + remaining)
        } else {
            None
        };

        debug!(
            key = %key,
            position = spec.position,
            cached_prefix = prefix,
            upstream_length = ?upstream_length,
            "Reading through cache"
        );

        for listener in &self.listeners {
            listener.on_transfer_start(spec);
        }
        self.state = Some(OpenRead {
            spec: spec.clone(),
            key,
            cached,
            upstream_open: true,
            tee: Some(Tee {
                position: upstream_spec.position,
                buffer: BytesMut::new(),
            }),
            position: spec.position,
            content_length,
        });

        Ok(upstream_length
            .map(|len| len + prefix)
            .or(spec.length))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(state) = self.state.as_mut() else {
            return Err(PlaybackError::IllegalState(
                "read on a cache source that is not open".to_string(),
            ));
        };
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(reader) = state.cached.as_mut() {
            let n = reader.read(buf).await?;
            if n > 0 {
                state.position += n as u64;
                notify_bytes(&self.listeners, &state.spec, n);
                return Ok(n);
            }
            state.cached = None;
        }

        if !state.upstream_open {
            return Ok(0);
        }

        let n = match self.upstream.read(buf).await {
            Ok(n) => n,
            Err(e) => {
                if e.is_cancelled() || state.spec.cancel.is_cancelled() {
                    state.tee = None;
                }
                return Err(e);
            }
        };

        if n == 0 {
            if state.spec.length.is_none() {
                state.content_length = Some(state.position);
            }
            state.finish_tee(&self.store, self.fragment_size).await;
            return Ok(0);
        }

        if let Some(tee) = state.tee.as_mut() {
            tee.buffer.extend_from_slice(&buf[..n]);
        }
        flush_tee(
            &self.store,
            &state.key,
            &mut state.tee,
            self.fragment_size,
            false,
        )
        .await;

        state.position += n as u64;
        notify_bytes(&self.listeners, &state.spec, n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        if state.spec.cancel.is_cancelled() {
            state.tee = None;
        } else {
            state.finish_tee(&self.store, self.fragment_size).await;
        }

        // Unpins any spans the caller did not read to the end.
        state.cached = None;

        let result = if state.upstream_open {
            self.upstream.close().await
        } else {
            Ok(())
        };

        for listener in &self.listeners {
            listener.on_transfer_end(&state.spec);
        }
        result
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.listeners.push(listener);
    }

    fn uri(&self) -> Option<&str> {
        let state = self.state.as_ref()?;
        if state.upstream_open {
            self.upstream.uri()
        } else {
            Some(state.spec.uri.as_str())
        }
    }
}
