//! # Byte-Limited File Store
//!
//! Directory-backed store of cached byte spans with a hard byte budget and
//! oldest-first eviction.
//!
//! This module provides:
//! - One file per contiguous span, written to a temp file and committed by rename
//! - A metadata table guarded by a single lock that is never held across `.await`
//! - Per-key write serialization so writers of different keys run in parallel
//! - Reference-counted reader leases; pinned spans are never evicted
//! - Deferred eviction that resumes when the last lease on a span is released
//! - Optional persistence of the table as `cache_index.json`

use crate::cache::config::{CacheConfig, CacheLimit, INDEX_FILE_NAME};
use crate::cache::index::{self, IndexFile, IndexedSpan, INDEX_VERSION, SPAN_SUFFIX, TEMP_SUFFIX};
use crate::cache::reader::{CachedSpanReader, ReadPiece};
use crate::cache::stats::{CacheStats, CacheStoreState};
use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::logging::strip_path;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Identifier of one span file.
pub type SpanId = u64;

#[derive(Debug, Clone)]
struct Span {
    id: SpanId,
    key: String,
    position: u64,
    length: u64,
    file: String,
    last_access: i64,
    pins: usize,
}

impl Span {
    fn end(&self) -> u64 {
        self.position + self.length
    }
}

#[derive(Debug, Default)]
struct KeyEntry {
    /// Span ids by start position. Spans of one key never overlap.
    spans: BTreeMap<u64, SpanId>,
    content_length: Option<u64>,
}

#[derive(Debug, Default)]
struct EvictOutcome {
    evicted: usize,
    deferred: bool,
}

#[derive(Debug)]
struct Table {
    keys: HashMap<String, KeyEntry>,
    spans: HashMap<SpanId, Span>,
    /// Spans cleared while pinned: (file, pins). The file goes once pins reach zero.
    released_pinned: HashMap<SpanId, (String, usize)>,
    pending_deletions: Vec<String>,
    next_id: SpanId,
    state: CacheStoreState,
    read_only: bool,
    dirty: bool,
}

impl Table {
    fn new(limit: CacheLimit, read_only: bool) -> Self {
        Self {
            keys: HashMap::new(),
            spans: HashMap::new(),
            released_pinned: HashMap::new(),
            pending_deletions: Vec::new(),
            next_id: 1,
            state: CacheStoreState::new(limit),
            read_only,
            dirty: false,
        }
    }

    fn allocate_id(&mut self) -> SpanId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Length of the request once resolved against the known resource length.
    fn requested_len(&self, key: &str, position: u64, length: Option<u64>) -> Option<u64> {
        match length {
            Some(len) => Some(len),
            None => self
                .keys
                .get(key)
                .and_then(|entry| entry.content_length)
                .map(|total| total.saturating_sub(position)),
        }
    }

    /// Bytes contiguously cached from `position`, capped at `limit`.
    fn covered_len(&self, key: &str, position: u64, limit: Option<u64>) -> u64 {
        let Some(entry) = self.keys.get(key) else {
            return 0;
        };

        let mut cursor = position;
        while let Some((_, id)) = entry.spans.range(..=cursor).next_back() {
            let Some(span) = self.spans.get(id) else {
                break;
            };
            if span.end() <= cursor {
                break;
            }
            cursor = span.end();
            if limit.is_some_and(|len| cursor - position >= len) {
                break;
            }
        }

        let covered = cursor - position;
        limit.map_or(covered, |len| covered.min(len))
    }

    fn is_covered(&self, key: &str, position: u64, length: Option<u64>) -> bool {
        match self.requested_len(key, position, length) {
            None => false,
            Some(0) => true,
            Some(len) => self.covered_len(key, position, Some(len)) >= len,
        }
    }

    /// Sub-ranges of `[position, position + len)` not yet cached for `key`.
    fn uncovered(&self, key: &str, position: u64, len: u64) -> Vec<(u64, u64)> {
        let end = position + len;
        let mut gaps = Vec::new();
        let mut cursor = position;

        if let Some(entry) = self.keys.get(key) {
            let first = entry
                .spans
                .range(..=position)
                .next_back()
                .map(|(start, _)| *start)
                .unwrap_or(position);

            for id in entry.spans.range(first..end).map(|(_, id)| id) {
                let Some(span) = self.spans.get(id) else {
                    continue;
                };
                if span.end() <= cursor {
                    continue;
                }
                if span.position > cursor {
                    gaps.push((cursor, span.position - cursor));
                }
                cursor = cursor.max(span.end());
                if cursor >= end {
                    break;
                }
            }
        }

        if cursor < end {
            gaps.push((cursor, end - cursor));
        }
        gaps
    }

    fn insert_span(&mut self, span: Span) {
        self.state.total_bytes_used += span.length;
        self.keys
            .entry(span.key.clone())
            .or_default()
            .spans
            .insert(span.position, span.id);
        self.spans.insert(span.id, span);
        self.dirty = true;
    }

    fn remove_span(&mut self, id: SpanId) -> Option<Span> {
        let span = self.spans.remove(&id)?;
        self.state.total_bytes_used -= span.length;

        let now_empty = match self.keys.get_mut(&span.key) {
            Some(entry) => {
                entry.spans.remove(&span.position);
                entry.spans.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.keys.remove(&span.key);
        }

        self.dirty = true;
        Some(span)
    }

    /// Evict unpinned spans, oldest access first, until usage fits the budget.
    fn evict(&mut self, protected: &HashSet<SpanId>) -> EvictOutcome {
        let mut outcome = EvictOutcome::default();
        if !self.state.is_over_budget() {
            return outcome;
        }

        let mut candidates: Vec<(i64, SpanId)> = self
            .spans
            .values()
            .filter(|span| span.pins == 0 && !protected.contains(&span.id))
            .map(|span| (span.last_access, span.id))
            .collect();
        candidates.sort_unstable();

        for (_, id) in candidates {
            if !self.state.is_over_budget() {
                break;
            }
            if let Some(span) = self.remove_span(id) {
                debug!(key_len = span.key.len(), position = span.position, length = span.length, "Evicted span");
                self.pending_deletions.push(span.file);
                self.state.evicted_spans += 1;
                outcome.evicted += 1;
            }
        }

        outcome.deferred = self.state.is_over_budget();
        outcome
    }

    fn release(&mut self, id: SpanId) {
        if let Some(span) = self.spans.get_mut(&id) {
            span.pins = span.pins.saturating_sub(1);
            if span.pins == 0 && self.state.is_over_budget() {
                let outcome = self.evict(&HashSet::new());
                if outcome.evicted > 0 {
                    debug!(evicted = outcome.evicted, "Resumed deferred eviction");
                }
            }
            return;
        }

        let finished = match self.released_pinned.get_mut(&id) {
            Some((_, pins)) => {
                *pins = pins.saturating_sub(1);
                *pins == 0
            }
            None => false,
        };
        if finished {
            if let Some((file, _)) = self.released_pinned.remove(&id) {
                self.pending_deletions.push(file);
            }
        }
    }

    fn snapshot(&self) -> IndexFile {
        let mut spans: Vec<IndexedSpan> = self
            .spans
            .values()
            .map(|span| IndexedSpan {
                id: span.id,
                key: span.key.clone(),
                position: span.position,
                length: span.length,
                file: span.file.clone(),
                last_access: span.last_access,
            })
            .collect();
        spans.sort_by_key(|span| span.id);

        let content_lengths = self
            .keys
            .iter()
            .filter_map(|(key, entry)| entry.content_length.map(|len| (key.clone(), len)))
            .collect();

        IndexFile {
            version: INDEX_VERSION,
            next_span_id: self.next_id,
            spans,
            content_lengths,
        }
    }
}

pub(crate) struct StoreInner {
    directory: PathBuf,
    persist_index: bool,
    fragment_size: u64,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    table: RwLock<Table>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    index_lock: tokio::sync::Mutex<()>,
}

impl StoreInner {
    fn release(&self, id: SpanId) {
        self.table.write().release(id);
    }
}

/// Reader lease on one span; the span cannot be evicted while a lease exists.
pub(crate) struct SpanLease {
    store: Arc<StoreInner>,
    id: SpanId,
}

impl Drop for SpanLease {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

/// Span files written by an in-flight `write` but not yet in the table.
///
/// If the write is dropped before committing, the files are queued for deletion
/// and removed by the next async store operation.
struct UncommittedFiles {
    store: Arc<StoreInner>,
    files: Vec<String>,
}

impl UncommittedFiles {
    fn new(store: Arc<StoreInner>) -> Self {
        Self {
            store,
            files: Vec::new(),
        }
    }

    fn track(&mut self, file: &str) {
        self.files.push(file.to_string());
    }

    fn commit(&mut self) {
        self.files.clear();
    }
}

impl Drop for UncommittedFiles {
    fn drop(&mut self) {
        if self.files.is_empty() {
            return;
        }
        debug!(files = self.files.len(), "Discarding uncommitted span files");
        self.store
            .table
            .write()
            .pending_deletions
            .append(&mut self.files);
    }
}

/// Byte-budgeted store of cached resource spans.
///
/// Cloning is cheap; clones share the same table and directory.
///
/// # Example
///
/// ```rust,ignore
/// use core_playback::cache::{ByteLimitedFileStore, CacheConfig};
///
/// let store = ByteLimitedFileStore::load(CacheConfig::new(dir), fs, clock).await?;
/// store.write("track-1", 0, bytes).await?;
/// assert!(store.is_cached("track-1", 0, Some(bytes_len)));
/// ```
#[derive(Clone)]
pub struct ByteLimitedFileStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ByteLimitedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteLimitedFileStore")
            .field("directory", &self.inner.directory)
            .field("state", &self.state())
            .finish()
    }
}

impl ByteLimitedFileStore {
    /// Open the store in `config.directory`, restoring the persisted index.
    ///
    /// Spans whose files are missing or have the wrong size are dropped, span and
    /// temp files nothing refers to are deleted, and the budget is enforced.
    #[instrument(skip(fs, clock), fields(directory = ?config.directory))]
    pub async fn load(
        config: CacheConfig,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(|e| {
            PlaybackError::CacheError(format!("Invalid cache configuration: {}", e))
        })?;

        fs.create_dir_all(&config.directory).await.map_err(|e| {
            PlaybackError::CacheError(format!("Failed to create cache directory: {}", e))
        })?;

        let store = Self {
            inner: Arc::new(StoreInner {
                directory: config.directory.clone(),
                persist_index: config.persist_index,
                fragment_size: config.fragment_size,
                fs,
                clock,
                table: RwLock::new(Table::new(config.limit, config.read_only)),
                write_locks: Mutex::new(HashMap::new()),
                index_lock: tokio::sync::Mutex::new(()),
            }),
        };

        if config.persist_index {
            store.restore(&config.index_path()).await;
        }
        store.sweep_directory().await;

        let outcome = {
            let mut table = store.inner.table.write();
            let outcome = table.evict(&HashSet::new());
            if outcome.deferred {
                table.state.evictions_deferred += 1;
            }
            outcome
        };
        if outcome.evicted > 0 {
            info!(evicted = outcome.evicted, "Trimmed cache to budget after reload");
        }

        store.persist_index().await;
        store.purge_pending().await;

        let state = store.state();
        info!(
            bytes_used = state.total_bytes_used,
            limit = ?state.max_bytes,
            "Cache store opened"
        );
        Ok(store)
    }

    async fn restore(&self, index_path: &Path) {
        let Some(mut file) = index::load(self.inner.fs.as_ref(), index_path).await else {
            return;
        };

        file.spans.sort_by(|a, b| (&a.key, a.position).cmp(&(&b.key, b.position)));

        let mut kept = Vec::with_capacity(file.spans.len());
        for span in file.spans {
            let path = self.inner.directory.join(&span.file);
            match self.inner.fs.metadata(&path).await {
                Ok(meta) if !meta.is_directory && meta.size == span.length && span.length > 0 => {
                    kept.push(span)
                }
                Ok(meta) => {
                    warn!(
                        file = %span.file,
                        expected = span.length,
                        actual = meta.size,
                        "Dropping cached span with unexpected size"
                    );
                }
                Err(_) => {
                    warn!(file = %span.file, "Dropping cached span with missing file");
                }
            }
        }

        let mut table = self.inner.table.write();
        let mut max_id = 0;
        for span in kept {
            let overlaps = table.uncovered(&span.key, span.position, span.length)
                != vec![(span.position, span.length)];
            if overlaps {
                warn!(file = %span.file, "Dropping overlapping cached span");
                continue;
            }
            max_id = max_id.max(span.id);
            table.insert_span(Span {
                id: span.id,
                key: span.key,
                position: span.position,
                length: span.length,
                file: span.file,
                last_access: span.last_access,
                pins: 0,
            });
        }
        for (key, length) in file.content_lengths {
            table.keys.entry(key).or_default().content_length = Some(length);
        }
        table.keys.retain(|_, entry| !entry.spans.is_empty());
        table.next_id = file.next_span_id.max(max_id + 1);
        table.dirty = true;
    }

    /// Delete span and temp files the table does not reference.
    async fn sweep_directory(&self) {
        let entries = match self.inner.fs.list_directory(&self.inner.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list cache directory");
                return;
            }
        };

        let referenced: HashSet<String> = self
            .inner
            .table
            .read()
            .spans
            .values()
            .map(|span| span.file.clone())
            .collect();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == INDEX_FILE_NAME || referenced.contains(name) {
                continue;
            }
            if name.ends_with(SPAN_SUFFIX) || name.ends_with(TEMP_SUFFIX) {
                debug!(file = %name, "Removing orphaned cache file");
                if let Err(e) = self.inner.fs.delete_file(&path).await {
                    warn!(file = %name, error = %e, "Failed to remove orphaned cache file");
                }
            }
        }
    }

    /// Directory holding span files and the index.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Span size cache sources write with unless told otherwise.
    pub fn fragment_size(&self) -> u64 {
        self.inner.fragment_size
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns `true` iff `[position, position + length)` is fully cached for `key`.
    ///
    /// `length == None` means "to the end of the resource" and is only answerable
    /// once the resource length is known. Pure metadata lookup, never mutates.
    pub fn is_cached(&self, key: &str, position: u64, length: Option<u64>) -> bool {
        self.inner.table.read().is_covered(key, position, length)
    }

    /// Bytes cached contiguously from `position`, at most `length`.
    pub fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> u64 {
        self.inner.table.read().covered_len(key, position, length)
    }

    /// Total resource length recorded for `key`.
    pub fn content_length(&self, key: &str) -> Option<u64> {
        self.inner
            .table
            .read()
            .keys
            .get(key)
            .and_then(|entry| entry.content_length)
    }

    /// Record the total length of the resource behind `key`.
    ///
    /// Only kept for keys with at least one cached span, and dropped together with
    /// the key's last span. Returns `true` if the length was recorded.
    pub fn set_content_length(&self, key: &str, length: u64) -> bool {
        let mut table = self.inner.table.write();
        if table.read_only {
            return false;
        }
        let Some(entry) = table.keys.get_mut(key).filter(|entry| !entry.spans.is_empty()) else {
            return false;
        };
        if entry.content_length != Some(length) {
            entry.content_length = Some(length);
            table.dirty = true;
        }
        true
    }

    /// Keys with at least one cached span.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .table
            .read()
            .keys
            .iter()
            .filter(|(_, entry)| !entry.spans.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Current `total_bytes_used`.
    pub fn size(&self) -> u64 {
        self.inner.table.read().state.total_bytes_used
    }

    /// Current budget.
    pub fn max_size(&self) -> CacheLimit {
        self.inner.table.read().state.max_bytes
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.table.read().read_only
    }

    /// Switch between read-write and read-only.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.table.write().read_only = read_only;
    }

    /// Snapshot of the byte accounting.
    pub fn state(&self) -> CacheStoreState {
        self.inner.table.read().state.clone()
    }

    /// Snapshot statistics.
    pub fn stats(&self) -> CacheStats {
        let table = self.inner.table.read();
        CacheStats {
            key_count: table
                .keys
                .values()
                .filter(|entry| !entry.spans.is_empty())
                .count(),
            span_count: table.spans.len(),
            total_bytes: table.state.total_bytes_used,
            max_bytes: table.state.max_bytes.max_bytes(),
            pinned_spans: table.spans.values().filter(|span| span.pins > 0).count()
                + table.released_pinned.len(),
            evicted_spans: table.state.evicted_spans,
            evictions_deferred: table.state.evictions_deferred,
            calculated_at: self.inner.clock.unix_timestamp_millis(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Open a reader over `[position, position + length)` of `key`.
    ///
    /// Every span touched is pinned until the reader moves past it or is dropped,
    /// and its access time is refreshed.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::NotCached`] if the range is not fully covered.
    pub fn open(&self, key: &str, position: u64, length: Option<u64>) -> Result<CachedSpanReader> {
        let now = self.inner.clock.unix_timestamp_millis();
        let mut table = self.inner.table.write();

        let requested = table
            .requested_len(key, position, length)
            .ok_or_else(|| PlaybackError::NotCached(format!("{} (length unknown)", key)))?;
        if requested > 0 && table.covered_len(key, position, Some(requested)) < requested {
            return Err(PlaybackError::NotCached(format!(
                "{} [{}..{})",
                key,
                position,
                position + requested
            )));
        }

        Ok(self.lease(&mut table, key, position, requested, now))
    }

    /// Like [`open`](Self::open), but a miss is `None`.
    ///
    /// Coverage is checked and the spans pinned under one lock, so a concurrent
    /// eviction cannot turn a hit into an error.
    pub fn try_open(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> Option<CachedSpanReader> {
        self.open(key, position, length).ok()
    }

    /// Reader over the cached bytes contiguous from `position`, at most `length`.
    ///
    /// Returns `None` when nothing is cached at `position`. The prefix is measured
    /// and pinned under one lock.
    pub fn open_prefix(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> Option<CachedSpanReader> {
        let now = self.inner.clock.unix_timestamp_millis();
        let mut table = self.inner.table.write();

        let prefix = table.covered_len(key, position, length);
        if prefix == 0 {
            return None;
        }
        Some(self.lease(&mut table, key, position, prefix, now))
    }

    /// Pin the spans covering `[position, position + requested)` and build a reader.
    ///
    /// The range must be covered.
    fn lease(
        &self,
        table: &mut Table,
        key: &str,
        position: u64,
        requested: u64,
        now: i64,
    ) -> CachedSpanReader {
        let end = position + requested;
        let ids: Vec<SpanId> = match table.keys.get(key) {
            Some(entry) if requested > 0 => {
                let first = entry
                    .spans
                    .range(..=position)
                    .next_back()
                    .map(|(start, _)| *start)
                    .unwrap_or(position);
                entry.spans.range(first..end).map(|(_, id)| *id).collect()
            }
            _ => Vec::new(),
        };

        let mut pieces = Vec::with_capacity(ids.len());
        let mut cursor = position;
        for id in ids {
            let Some(span) = table.spans.get_mut(&id) else {
                continue;
            };
            if span.end() <= cursor {
                continue;
            }
            let take = span.end().min(end) - cursor;
            span.pins += 1;
            span.last_access = now;
            pieces.push(ReadPiece {
                _lease: SpanLease {
                    store: Arc::clone(&self.inner),
                    id,
                },
                path: self.inner.directory.join(&span.file),
                offset: cursor - span.position,
                remaining: take,
            });
            cursor += take;
            if cursor >= end {
                break;
            }
        }
        table.dirty = true;

        CachedSpanReader::new(Arc::clone(&self.inner.fs), pieces, position, requested)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Store `data` at `position` of `key`.
    ///
    /// Only the parts not already cached are written. Returns the number of bytes
    /// added. Eviction runs before the call returns; if pinned spans keep usage over
    /// the budget, the pass is counted in `evictions_deferred`.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::ReadOnlyCache`] when the store is read-only
    /// - [`PlaybackError::CacheFull`] when `data` alone exceeds the budget
    /// - [`PlaybackError::CacheError`] when a span file cannot be written; nothing
    ///   is accounted in that case
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn write(&self, key: &str, position: u64, data: Bytes) -> Result<u64> {
        self.purge_pending().await;

        let len = data.len() as u64;
        {
            let table = self.inner.table.read();
            if table.read_only {
                return Err(PlaybackError::ReadOnlyCache(key.to_string()));
            }
            if let Some(max) = table.state.max_bytes.max_bytes() {
                if len > max {
                    return Err(PlaybackError::CacheFull {
                        requested: len,
                        max_bytes: max,
                    });
                }
            }
        }
        if len == 0 {
            return Ok(0);
        }

        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().await;

        let gaps = self.inner.table.read().uncovered(key, position, len);
        if gaps.is_empty() {
            debug!("Range already cached");
            return Ok(0);
        }

        let mut uncommitted = UncommittedFiles::new(Arc::clone(&self.inner));
        let mut written: Vec<Span> = Vec::with_capacity(gaps.len());
        for (gap_position, gap_len) in gaps {
            let id = self.inner.table.write().allocate_id();
            let file = index::span_file_name(key, gap_position, id);
            let start = (gap_position - position) as usize;
            let slice = data.slice(start..start + gap_len as usize);

            uncommitted.track(&file);
            if let Err(e) = self.write_span_file(&file, slice).await {
                drop(uncommitted);
                self.purge_pending().await;
                return Err(e);
            }

            written.push(Span {
                id,
                key: key.to_string(),
                position: gap_position,
                length: gap_len,
                file,
                last_access: self.inner.clock.unix_timestamp_millis(),
                pins: 0,
            });
        }

        let (added, outcome, state) = {
            let mut table = self.inner.table.write();
            uncommitted.commit();
            let protected: HashSet<SpanId> = written.iter().map(|span| span.id).collect();
            let mut added = 0;
            for span in written {
                added += span.length;
                table.insert_span(span);
            }
            let outcome = table.evict(&protected);
            if outcome.deferred {
                table.state.evictions_deferred += 1;
            }
            (added, outcome, table.state.clone())
        };

        if outcome.deferred {
            warn!(
                bytes_used = state.total_bytes_used,
                limit = ?state.max_bytes,
                "Eviction deferred: remaining spans are pinned by open readers"
            );
        }
        debug!(added, evicted = outcome.evicted, bytes_used = state.total_bytes_used, "Cached span");

        self.persist_index().await;
        self.purge_pending().await;
        Ok(added)
    }

    /// Remove every span of `key`. Returns the bytes released.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<u64> {
        let released = {
            let mut table = self.inner.table.write();
            let ids: Vec<SpanId> = table
                .keys
                .get(key)
                .map(|entry| entry.spans.values().copied().collect())
                .unwrap_or_default();
            let mut released = 0;
            for id in ids {
                if let Some(span) = table.remove_span(id) {
                    released += span.length;
                    Self::discard(&mut table, span);
                }
            }
            released
        };

        self.persist_index().await;
        self.purge_pending().await;
        Ok(released)
    }

    /// Remove all spans and files and reset usage to zero.
    ///
    /// Files of spans still held by readers are deleted once those readers let go.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let cleared = {
            let mut table = self.inner.table.write();
            let spans: Vec<Span> = table.spans.drain().map(|(_, span)| span).collect();
            let cleared = spans.len();
            for span in spans {
                Self::discard(&mut table, span);
            }
            table.keys.clear();
            table.state.total_bytes_used = 0;
            table.dirty = true;
            cleared
        };

        info!(cleared, "Cleared media cache");
        self.persist_index().await;
        self.purge_pending().await;
        Ok(())
    }

    /// Change the budget, evicting immediately if usage is now above it.
    #[instrument(skip(self))]
    pub async fn set_max_size(&self, limit: CacheLimit) -> Result<()> {
        if limit == CacheLimit::Bytes(0) {
            return Err(PlaybackError::CacheError(
                "Cache budget must be greater than 0 bytes".to_string(),
            ));
        }

        let (outcome, state) = {
            let mut table = self.inner.table.write();
            table.state.max_bytes = limit;
            let outcome = table.evict(&HashSet::new());
            if outcome.deferred {
                table.state.evictions_deferred += 1;
            }
            (outcome, table.state.clone())
        };

        if outcome.deferred {
            warn!(
                bytes_used = state.total_bytes_used,
                "Eviction deferred after budget change: spans are pinned"
            );
        }
        info!(limit = ?limit, evicted = outcome.evicted, "Cache budget updated");

        self.persist_index().await;
        self.purge_pending().await;
        Ok(())
    }

    /// Persist pending metadata changes and delete released files.
    pub async fn flush(&self) -> Result<()> {
        self.persist_index().await;
        self.purge_pending().await;
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn discard(table: &mut Table, span: Span) {
        if span.pins > 0 {
            table.released_pinned.insert(span.id, (span.file, span.pins));
        } else {
            table.pending_deletions.push(span.file);
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.write_locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn write_span_file(&self, file: &str, data: Bytes) -> Result<()> {
        let path = self.inner.directory.join(file);
        let tmp = index::temp_path(&path);

        if let Err(e) = self.inner.fs.write_file(&tmp, data).await {
            let _ = self.inner.fs.delete_file(&tmp).await;
            return Err(PlaybackError::CacheError(format!(
                "Failed to write span {}: {}",
                file, e
            )));
        }

        if let Err(e) = self.inner.fs.rename(&tmp, &path).await {
            let _ = self.inner.fs.delete_file(&tmp).await;
            return Err(PlaybackError::CacheError(format!(
                "Failed to commit span {}: {}",
                file, e
            )));
        }

        Ok(())
    }

    async fn delete_file_quietly(&self, file: &str) {
        let path = self.inner.directory.join(file);
        if let Err(e) = self.inner.fs.delete_file(&path).await {
            debug!(file = %strip_path(&path.to_string_lossy()), error = %e, "Failed to delete cache file");
        }
    }

    async fn purge_pending(&self) {
        let files = std::mem::take(&mut self.inner.table.write().pending_deletions);
        for file in files {
            self.delete_file_quietly(&file).await;
        }
    }

    async fn persist_index(&self) {
        if !self.inner.persist_index {
            return;
        }

        let _guard = self.inner.index_lock.lock().await;
        let snapshot = {
            let mut table = self.inner.table.write();
            if !table.dirty {
                return;
            }
            table.dirty = false;
            table.snapshot()
        };

        let path = self.inner.directory.join(INDEX_FILE_NAME);
        if let Err(e) = index::persist(self.inner.fs.as_ref(), &path, &snapshot).await {
            warn!(error = %e, "Failed to persist cache index");
            self.inner.table.write().dirty = true;
        }
    }
}
