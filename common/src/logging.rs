//! Process-wide logging bootstrap.
//!
//! Library crates log through the `log` facade; binaries and tests call
//! [`init_logging`] once to install a `tracing` subscriber that also picks
//! up `log` records.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ConfigError, Result};

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::InvalidValue {
                field: "log_level".to_string(),
                message: format!("unknown level '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when `RUST_LOG` is unset. Fails if a global subscriber is already set.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| ConfigError::InvalidValue {
            field: "log filter".to_string(),
            message: e.to_string(),
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::debug!(filter = default_filter, "logging initialised");
    Ok(())
}

/// [`init_logging`] scoped to the xmodal crates at `level`.
pub fn init_with_level(level: LogLevel) -> Result<()> {
    let filter = [
        "xmodal_common",
        "xmodal_values",
        "xmodal_tokenization",
        "xmodal_onnx_loader",
        "xmodal_pipeline",
        "xmodal_model_cache",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",");
    init_logging(&filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
