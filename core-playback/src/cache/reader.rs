//! Reader over pinned cache spans

use crate::cache::store::SpanLease;
use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// One span file slice still to be read.
pub(crate) struct ReadPiece {
    /// Dropping the piece unpins the span.
    pub(crate) _lease: SpanLease,
    pub(crate) path: PathBuf,
    pub(crate) offset: u64,
    pub(crate) remaining: u64,
}

/// Sequential reader over a fully cached range.
///
/// Each span stays pinned until the reader has consumed it or is dropped.
pub struct CachedSpanReader {
    fs: Arc<dyn FileSystemAccess>,
    pieces: VecDeque<ReadPiece>,
    position: u64,
    length: u64,
    remaining: u64,
}

impl std::fmt::Debug for CachedSpanReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSpanReader")
            .field("position", &self.position)
            .field("length", &self.length)
            .field("remaining", &self.remaining)
            .field("pinned_spans", &self.pieces.len())
            .finish()
    }
}

impl CachedSpanReader {
    pub(crate) fn new(
        fs: Arc<dyn FileSystemAccess>,
        pieces: Vec<ReadPiece>,
        position: u64,
        length: u64,
    ) -> Self {
        Self {
            fs,
            pieces: pieces.into(),
            position,
            length,
            remaining: length,
        }
    }

    /// Total bytes this reader delivers.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Absolute offset of the next byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Spans still pinned by this reader.
    pub fn pinned_spans(&self) -> usize {
        self.pieces.len()
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` once the range is exhausted.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let Some(piece) = self.pieces.front_mut() else {
            return Ok(0);
        };

        let want = (buf.len() as u64).min(piece.remaining) as usize;
        let bytes = self
            .fs
            .read_range(&piece.path, piece.offset, want)
            .await
            .map_err(|e| PlaybackError::CacheError(format!("Failed to read cached span: {}", e)))?;

        if bytes.is_empty() {
            return Err(PlaybackError::CacheError(format!(
                "Cached span truncated at offset {}",
                piece.offset
            )));
        }

        let n = bytes.len().min(want);
        buf[..n].copy_from_slice(&bytes[..n]);
        piece.offset += n as u64;
        piece.remaining -= n as u64;
        self.position += n as u64;
        self.remaining -= n as u64;

        if piece.remaining == 0 {
            // Releases the lease on this span.
            self.pieces.pop_front();
        }

        Ok(n)
    }

    /// Read everything that is left.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(self.remaining as usize);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out.freeze())
    }
}
