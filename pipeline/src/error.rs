/// Pipeline errors
///
/// Everything a task handler can fail with. Failures of the lower crates
/// (model invocation, tokenization, tensor shapes) pass through unchanged.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Unrecognized input shape, or a batch above the task's ceiling.
    #[error("Invalid input: {0}")]
    InputShape(String),

    #[error("Token {token} not found in the tokenized input")]
    MissingToken { token: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Model has no '{head}' output")]
    UnsupportedOutput { head: String },

    #[error("Processor failed: {0}")]
    Processor(String),

    #[error("Pipeline type not supported: {0}")]
    UnsupportedPipelineType(String),

    #[error(transparent)]
    Model(#[from] xmodal_onnx_loader::OnnxError),

    #[error(transparent)]
    Tokenization(#[from] xmodal_tokenization::TokenizationError),

    #[error(transparent)]
    Value(#[from] xmodal_values::ValueError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    pub fn input_shape(message: impl Into<String>) -> Self {
        Self::InputShape(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
