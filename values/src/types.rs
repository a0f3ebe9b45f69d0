use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type for tensor elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorDataType {
    Float32,
    Int64,
    Int32,
    Int8,
    Uint8,
    Bool,
}

impl TensorDataType {
    /// Name used by ONNX graphs and the JSON representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Bool => "bool",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32)
    }
}

impl fmt::Display for TensorDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_serialization() {
        let json = serde_json::to_string(&TensorDataType::Float32).expect("Serialization failed");
        assert_eq!(json, r#""float32""#);

        let dtype: TensorDataType = serde_json::from_str(r#""uint8""#).expect("Deserialization failed");
        assert_eq!(dtype, TensorDataType::Uint8);
    }

    #[test]
    fn test_dtype_display() {
        assert_eq!(TensorDataType::Int64.to_string(), "int64");
        assert!(TensorDataType::Float32.is_float());
        assert!(!TensorDataType::Bool.is_float());
    }
}
