//! Storage and File System Abstractions
//!
//! Provides the platform-agnostic file I/O trait backing the on-disk media cache.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app cache directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn cache_data(fs: &dyn FileSystemAccess, data: &[u8]) -> Result<()> {
///     let cache_dir = fs.get_cache_directory().await?;
///     let file_path = cache_dir.join("data.bin");
///     fs.write_file(&file_path, data.to_vec().into()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// This directory is suitable for files that can be deleted
    /// by the system when storage is low.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Read at most `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the file ends first.
    async fn read_range(&self, path: &Path, offset: u64, len: usize) -> Result<Bytes>;

    /// Write data to a file, creating or truncating it
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Atomically replace `to` with `from`
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
