use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading runtime configuration or installing logging.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
