//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bridge_traits::time::{Clock, ManualClock};
use bytes::Bytes;
use core_playback::cache::{ByteLimitedFileStore, CacheConfig};
use core_playback::{DataSource, DataSourceFactory, DataSpec, PlaybackError, Result, TransferListener};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

// ============================================================================
// Scripted data source
// ============================================================================

/// Answer to one `open()`: the whole resource, or an error.
pub type Response = Arc<dyn Fn(&DataSpec) -> Result<Bytes> + Send + Sync>;

pub fn serve(data: &[u8]) -> Response {
    let data = Bytes::copy_from_slice(data);
    Arc::new(move |_: &DataSpec| Ok(data.clone()))
}

pub fn fail(make: fn() -> PlaybackError) -> Response {
    Arc::new(move |_: &DataSpec| Err(make()))
}

pub fn status_error(status: u16) -> PlaybackError {
    PlaybackError::InvalidResponseCode {
        status,
        uri: "https://cdn.example.com/track.webm".to_string(),
    }
}

pub fn timeout() -> PlaybackError {
    PlaybackError::Timeout("connect".to_string())
}

/// One recorded `open()`.
#[derive(Debug, Clone)]
pub struct OpenCall {
    pub position: u64,
    pub length: Option<u64>,
    pub range_header: Option<String>,
    pub at: Instant,
}

/// Queue of responses shared by every source it creates.
///
/// Once the queue is empty, `fallback` answers every further open.
#[derive(Clone)]
pub struct Script {
    queue: Arc<Mutex<VecDeque<Response>>>,
    fallback: Response,
    calls: Arc<Mutex<Vec<OpenCall>>>,
}

impl Script {
    pub fn new(fallback: Response) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then(self, response: Response) -> Self {
        self.queue.lock().push_back(response);
        self
    }

    pub fn source(&self) -> ScriptedSource {
        ScriptedSource {
            script: self.clone(),
            open: None,
            listeners: Vec::new(),
        }
    }

    pub fn boxed(&self) -> Box<dyn DataSource> {
        Box::new(self.source())
    }

    pub fn factory(&self) -> Arc<dyn DataSourceFactory> {
        let script = self.clone();
        Arc::new(move || -> Box<dyn DataSource> { script.boxed() })
    }

    pub fn calls(&self) -> Vec<OpenCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next(&self) -> Response {
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

pub struct ScriptedSource {
    script: Script,
    open: Option<(DataSpec, Bytes)>,
    listeners: Vec<Arc<dyn TransferListener>>,
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        self.script.calls.lock().push(OpenCall {
            position: spec.position,
            length: spec.length,
            range_header: spec.header("Range").map(str::to_string),
            at: Instant::now(),
        });

        let data = (self.script.next())(spec)?;
        let start = (spec.position as usize).min(data.len());
        let end = match spec.length {
            Some(len) => (start + len as usize).min(data.len()),
            None => data.len(),
        };
        let body = data.slice(start..end);
        let length = body.len() as u64;

        for listener in &self.listeners {
            listener.on_transfer_start(spec);
        }
        self.open = Some((spec.clone(), body));
        Ok(Some(length))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some((spec, body)) = self.open.as_mut() else {
            return Err(PlaybackError::IllegalState("not open".to_string()));
        };
        if spec.cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let n = buf.len().min(body.len());
        buf[..n].copy_from_slice(&body.split_to(n));
        for listener in &self.listeners {
            listener.on_bytes_transferred(spec, n);
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((spec, _)) = self.open.take() {
            for listener in &self.listeners {
                listener.on_transfer_end(&spec);
            }
        }
        Ok(())
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.listeners.push(listener);
    }

    fn uri(&self) -> Option<&str> {
        self.open.as_ref().map(|(spec, _)| spec.uri.as_str())
    }
}

/// Read `source` until it reports end of input.
pub async fn read_all(source: &mut dyn DataSource) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 37];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Listener
// ============================================================================

#[derive(Default)]
pub struct CountingListener {
    pub starts: AtomicUsize,
    pub bytes: AtomicUsize,
    pub ends: AtomicUsize,
}

impl TransferListener for CountingListener {
    fn on_transfer_start(&self, _spec: &DataSpec) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_bytes_transferred(&self, _spec: &DataSpec, bytes: usize) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn on_transfer_end(&self, _spec: &DataSpec) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// File system and store
// ============================================================================

/// Tokio file system whose writes can be switched to fail.
pub struct FlakyFs {
    inner: TokioFileSystem,
    pub fail_writes: AtomicBool,
    /// Complete each rename, then never return.
    pub hang_after_rename: AtomicBool,
}

impl FlakyFs {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: TokioFileSystem::with_cache_dir(root),
            fail_writes: AtomicBool::new(false),
            hang_after_rename: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FileSystemAccess for FlakyFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.get_cache_directory().await
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        self.inner.metadata(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        self.inner.read_file(path).await
    }

    async fn read_range(&self, path: &Path, offset: u64, len: usize) -> BridgeResult<Bytes> {
        self.inner.read_range(path, offset, len).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("disk full".to_string()));
        }
        self.inner.write_file(path, data).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        self.inner.rename(from, to).await?;
        if self.hang_after_rename.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.delete_file(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        self.inner.list_directory(path).await
    }
}

pub struct TestStore {
    pub dir: tempfile::TempDir,
    pub fs: Arc<FlakyFs>,
    pub clock: Arc<ManualClock>,
    pub store: ByteLimitedFileStore,
}

impl TestStore {
    pub async fn new(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FlakyFs::new(dir.path().to_path_buf()));
        let clock = Arc::new(ManualClock::new(1));
        let store = open_store(dir.path(), &fs, &clock, configure).await;
        Self {
            dir,
            fs,
            clock,
            store,
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    /// Open a second store over the same directory.
    pub async fn reopen(&self, configure: impl FnOnce(CacheConfig) -> CacheConfig) -> ByteLimitedFileStore {
        open_store(self.dir.path(), &self.fs, &self.clock, configure).await
    }

    /// Names of the span files currently on disk.
    pub fn span_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.cache_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".span"))
            .collect();
        names.sort();
        names
    }

    /// Sum of the sizes of all span files on disk.
    pub fn bytes_on_disk(&self) -> u64 {
        self.span_files()
            .iter()
            .map(|name| std::fs::metadata(self.cache_dir().join(name)).unwrap().len())
            .sum()
    }
}

async fn open_store(
    root: &Path,
    fs: &Arc<FlakyFs>,
    clock: &Arc<ManualClock>,
    configure: impl FnOnce(CacheConfig) -> CacheConfig,
) -> ByteLimitedFileStore {
    let config = configure(CacheConfig::new(root.join("media")));
    let fs: Arc<dyn FileSystemAccess> = Arc::clone(fs) as Arc<dyn FileSystemAccess>;
    let clock: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
    ByteLimitedFileStore::load(config, fs, clock).await.unwrap()
}
