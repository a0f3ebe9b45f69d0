use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache key: '{0}'")]
    InvalidKey(String),

    #[error("Invalid repo id: '{0}'. Expected 'owner/repo'")]
    InvalidRepoId(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
