//! Model artifact cache for the xmodal pipelines.
//!
//! [`FileCache`] stores blobs under a root directory keyed by relative path;
//! [`ModelDownloader`] streams Hub files into it.

pub mod cache;
pub mod download;
pub mod error;

pub use cache::{FileCache, ProgressCallback, ProgressInfo};
pub use download::{cache_key, ModelDownloader};
pub use error::{CacheError, Result};
