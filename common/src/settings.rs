//! Runtime configuration.
//!
//! Sources, lowest priority first:
//! - Defaults
//! - TOML config file (missing sections keep their defaults)
//! - Environment variables (`XMODAL_CACHE_DIR`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::inference_settings::InferenceSettings;
use crate::logging::LogLevel;

/// Overrides [`RuntimeConfig::cache_dir`].
pub const CACHE_DIR_ENV: &str = "XMODAL_CACHE_DIR";

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub log_level: LogLevel,
    /// Root of the model artifact cache.
    pub cache_dir: PathBuf,
    pub session: SessionSettings,
    pub generation: InferenceSettings,
    pub speech: SpeechSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            cache_dir: default_cache_dir(),
            session: SessionSettings::default(),
            generation: InferenceSettings::default(),
            speech: SpeechSettings::default(),
        }
    }
}

/// `<platform cache dir>/xmodal`, or a temp-dir fallback on platforms without one.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("xmodal")
}

impl RuntimeConfig {
    /// Load from a TOML file and apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?.with_env_overrides();
        log::info!("Loaded runtime config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults. Environment overrides apply either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.as_ref().display());
            Ok(Self::default().with_env_overrides())
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            log::debug!("{} overrides cache_dir: {}", CACHE_DIR_ENV, dir);
            self.cache_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.speech.validate()
    }
}

/// Graph optimization level for ONNX Runtime sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Disable,
    Level1,
    Level2,
    #[default]
    Level3,
}

/// Per-session threading and optimization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Threads within ops
    pub intra_threads: usize,
    /// Threads between ops
    pub inter_threads: usize,
    pub optimization_level: OptimizationLevel,
    /// Run independent graph branches in parallel.
    pub parallel_execution: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            inter_threads: 2,
            optimization_level: OptimizationLevel::Level3,
            parallel_execution: false,
        }
    }
}

impl SessionSettings {
    fn validate(&self) -> Result<()> {
        if self.intra_threads == 0 || self.inter_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.intra_threads/inter_threads".to_string(),
                message: "thread counts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Defaults for diffusion-based speech synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechSettings {
    pub num_inference_steps: usize,
    /// Values above 1.0 shorten the output.
    pub speed: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self { num_inference_steps: 5, speed: 1.05 }
    }
}

impl SpeechSettings {
    fn validate(&self) -> Result<()> {
        if self.num_inference_steps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "speech.num_inference_steps".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.speed.is_nan() || self.speed <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "speech.speed".to_string(),
                message: format!("must be positive, got {}", self.speed),
            });
        }
        Ok(())
    }
}
