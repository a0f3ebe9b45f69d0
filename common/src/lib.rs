//! Shared configuration and logging for the xmodal crates.
//!
//! Sits at the bottom of the dependency hierarchy: no other workspace crate
//! is imported here.

pub mod error;
pub mod inference_settings;
pub mod logging;
pub mod settings;

pub use error::{ConfigError, Result};
pub use inference_settings::InferenceSettings;
pub use logging::{init_logging, init_with_level, LogLevel};
pub use settings::{
    default_cache_dir, OptimizationLevel, RuntimeConfig, SessionSettings, SpeechSettings, CACHE_DIR_ENV,
};
