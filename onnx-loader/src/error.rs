use thiserror::Error;

pub type Result<T> = std::result::Result<T, OnnxError>;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("Failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("Failed to create session: {0}")]
    SessionCreationFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Model input '{name}' was not provided")]
    MissingInput { name: String },

    #[error("Model did not produce output '{name}'")]
    MissingOutput { name: String },

    #[error("Unsupported tensor type: {0}")]
    UnsupportedType(String),

    /// Invalid construction parameters, raised before any model call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Value(#[from] xmodal_values::ValueError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OnnxError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
