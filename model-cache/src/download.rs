use std::path::PathBuf;

use futures::TryStreamExt;
use reqwest::Client;

use crate::cache::{FileCache, ProgressCallback};
use crate::error::{CacheError, Result};

const HUGGINGFACE_BASE: &str = "https://huggingface.co";
const DEFAULT_REVISION: &str = "main";

/// Streams files from the HuggingFace Hub into a [`FileCache`].
pub struct ModelDownloader {
    client: Client,
    endpoint: String,
    revision: String,
    token: Option<String>,
}

impl ModelDownloader {
    /// Reads the access token from `HF_TOKEN` (or `HUGGINGFACE_TOKEN`).
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("xmodal-model-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        let token = std::env::var("HF_TOKEN")
            .or_else(|_| std::env::var("HUGGINGFACE_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty());

        Self {
            client,
            endpoint: HUGGINGFACE_BASE.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            token,
        }
    }

    /// Mirror or proxy serving the Hub's `resolve` layout.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Explicit token, taking priority over the environment.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// `{endpoint}/{repo_id}/resolve/{revision}/{file_path}`
    pub fn file_url(&self, repo_id: &str, file_path: &str) -> Result<String> {
        if !is_valid_repo_id(repo_id) {
            return Err(CacheError::InvalidRepoId(repo_id.to_string()));
        }
        if !crate::cache::is_safe_key(file_path) {
            return Err(CacheError::InvalidKey(file_path.to_string()));
        }
        Ok(format!("{}/{}/resolve/{}/{}", self.endpoint, repo_id, self.revision, file_path))
    }

    /// Downloads `file_path` of `repo_id` into the cache, replacing any cached copy.
    pub async fn download_to_cache(
        &self,
        cache: &FileCache,
        repo_id: &str,
        file_path: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        let url = self.file_url(repo_id, file_path)?;
        log::info!("Downloading {} from {}", file_path, url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            log::debug!("Using HuggingFace token for authentication");
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CacheError::Download(format!(
                "HTTP {} while downloading {}/{}",
                response.status(),
                repo_id,
                file_path
            )));
        }

        let total = response.content_length();
        let stream = response.bytes_stream().map_err(CacheError::from);
        cache.put(&cache_key(repo_id, file_path), stream, total, progress).await
    }

    /// Cached path when present, otherwise downloads first.
    pub async fn get_or_download(
        &self,
        cache: &FileCache,
        repo_id: &str,
        file_path: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        if !is_valid_repo_id(repo_id) {
            return Err(CacheError::InvalidRepoId(repo_id.to_string()));
        }
        if let Some(path) = cache.lookup_path(&cache_key(repo_id, file_path)).await? {
            log::debug!("Cache hit for {}/{}", repo_id, file_path);
            return Ok(path);
        }
        self.download_to_cache(cache, repo_id, file_path, progress).await
    }
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key of a repo file: `owner/repo/path/in/repo`.
pub fn cache_key(repo_id: &str, file_path: &str) -> String {
    format!("{repo_id}/{file_path}")
}

/// `owner/repo` with no traversal and only safe characters.
fn is_valid_repo_id(repo_id: &str) -> bool {
    let mut parts = repo_id.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if owner.is_empty() || repo.is_empty() || repo_id.contains("..") {
        return false;
    }
    repo_id
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}
