//! Artifact cache on the local filesystem.
//!
//! Keys are relative paths (`owner/repo/onnx/model.onnx`). A blob is written
//! to a `.partial` sibling and renamed into place only once the stream ends,
//! so a failed write never leaves a truncated artifact under the real key.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use xmodal_common::RuntimeConfig;

use crate::error::{CacheError, Result};

const PARTIAL_SUFFIX: &str = ".partial";

/// One progress report during [`FileCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressInfo {
    /// Percent in `0..=100`; stays 0 while the total is unknown.
    pub progress: f64,
    pub loaded: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// Cache rooted at the configured `cache_dir`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.cache_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` under the root, rejecting absolute paths and `..`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Path of a complete blob, or `None` when absent.
    pub async fn lookup_path(&self, key: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Contents of a complete blob, or `None` when absent.
    pub async fn lookup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.lookup_path(key).await? {
            Some(path) => Ok(Some(fs::read(path).await?)),
            None => Ok(None),
        }
    }

    /// Streams `stream` into the blob at `key` and returns its path.
    ///
    /// `progress` is invoked after every chunk. On any error the partial file
    /// is removed before the error is returned.
    pub async fn put<S>(
        &self,
        key: &str,
        stream: S,
        total: Option<u64>,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        let path = self.path_for(key)?;
        let partial = partial_path(&path);

        match self.write_stream(&path, &partial, stream, total, progress).await {
            Ok(written) => {
                log::info!("Cached {} ({} bytes)", key, written);
                Ok(path)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("Failed to remove partial blob {}: {}", partial.display(), cleanup);
                    }
                }
                log::warn!("Discarded partial write of {}: {}", key, e);
                Err(e)
            }
        }
    }

    async fn write_stream<S>(
        &self,
        path: &Path,
        partial: &Path,
        mut stream: S,
        total: Option<u64>,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(partial).await?;
        let mut loaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            loaded += chunk.len() as u64;
            if let Some(callback) = progress {
                callback(progress_info(loaded, total));
            }
        }

        if let Some(expected) = total {
            if loaded != expected {
                return Err(CacheError::Download(format!(
                    "stream ended after {loaded} of {expected} bytes"
                )));
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(partial, path).await?;
        Ok(loaded)
    }

    /// Deletes a blob; absent blobs are not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn progress_info(loaded: u64, total: Option<u64>) -> ProgressInfo {
    let progress = match total {
        Some(total) if total > 0 => (loaded as f64 / total as f64 * 100.0).min(100.0),
        _ => 0.0,
    };
    ProgressInfo { progress, loaded, total }
}

/// Relative, normal components only.
pub(crate) fn is_safe_key(key: &str) -> bool {
    if key.is_empty() || key.contains('\0') || key.contains('\\') || key.ends_with(PARTIAL_SUFFIX) {
        return false;
    }
    Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}
