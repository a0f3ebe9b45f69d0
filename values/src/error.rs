//! Error types for the value system.

use thiserror::Error;
use crate::types::TensorDataType;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur when building or reading tensors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Buffer length does not match the product of the shape.
    #[error("Shape mismatch: dims {dims:?} need {expected} elements, buffer has {actual}")]
    ShapeMismatch {
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Element type mismatch on typed access.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: TensorDataType,
        actual: TensorDataType,
    },

    /// Index outside the bounds of an axis.
    #[error("Index {index} out of bounds for axis {axis} with size {size}")]
    IndexOutOfBounds {
        axis: usize,
        index: isize,
        size: usize,
    },

    /// Axis larger than the tensor rank.
    #[error("Axis {axis} out of range for tensor of rank {rank}")]
    InvalidAxis {
        axis: usize,
        rank: usize,
    },

    /// A named tensor was required but not present.
    #[error("Missing tensor: {name}")]
    MissingTensor {
        name: String,
    },

    /// Invalid value for the given operation.
    #[error("Invalid value: {message}")]
    InvalidValue {
        message: String,
    },
}

impl ValueError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue { message: message.into() }
    }
}
