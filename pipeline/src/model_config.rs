/// Model `config.json`
///
/// Only the fields the task handlers read. Everything else in the file is
/// ignored.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use xmodal_onnx_loader::SpeechModelConfig;

use crate::error::{PipelineError, Result};

/// `eos_token_id` is a single id in most configs and a list in some.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    One(i64),
    Many(Vec<i64>),
}

impl TokenIds {
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            Self::One(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_type: Option<String>,
    pub id2label: BTreeMap<String, String>,
    pub problem_type: Option<String>,
    pub sampling_rate: Option<u32>,
    pub eos_token_id: Option<TokenIds>,
    pub pad_token_id: Option<i64>,

    // Diffusion speech models
    pub base_chunk_size: Option<usize>,
    pub chunk_compress_factor: Option<usize>,
    pub latent_dim: Option<usize>,
}

impl ModelConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded model config from {}", path.as_ref().display());
        Self::from_json_str(&raw)
    }

    /// Label for a class index, `LABEL_{index}` when the config has none.
    pub fn label(&self, index: usize) -> String {
        self.id2label
            .get(&index.to_string())
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{index}"))
    }

    pub fn num_labels(&self) -> usize {
        self.id2label.len()
    }

    pub fn is_multi_label(&self) -> bool {
        self.problem_type.as_deref() == Some("multi_label_classification")
    }

    pub fn is_siglip(&self) -> bool {
        self.model_type.as_deref() == Some("siglip")
    }

    pub fn eos_token_ids(&self) -> Vec<i64> {
        self.eos_token_id.as_ref().map(TokenIds::to_vec).unwrap_or_default()
    }

    /// Chunking parameters of a diffusion speech model.
    pub fn speech_config(&self) -> Result<SpeechModelConfig> {
        let field = |value: Option<usize>, name: &str| {
            value.ok_or_else(|| PipelineError::Configuration(format!("model config has no '{name}'")))
        };
        Ok(SpeechModelConfig {
            sampling_rate: self
                .sampling_rate
                .ok_or_else(|| PipelineError::configuration("model config has no 'sampling_rate'"))?,
            base_chunk_size: field(self.base_chunk_size, "base_chunk_size")?,
            chunk_compress_factor: field(self.chunk_compress_factor, "chunk_compress_factor")?,
            latent_dim: field(self.latent_dim, "latent_dim")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_fallback() {
        let config = ModelConfig::from_json_str(
            r#"{"id2label": {"0": "NEGATIVE", "1": "POSITIVE"}, "problem_type": "single_label_classification"}"#,
        )
        .unwrap();
        assert_eq!(config.label(1), "POSITIVE");
        assert_eq!(config.label(5), "LABEL_5");
        assert!(!config.is_multi_label());
    }

    #[test]
    fn test_eos_single_or_list() {
        let one = ModelConfig::from_json_str(r#"{"eos_token_id": 2}"#).unwrap();
        assert_eq!(one.eos_token_ids(), vec![2]);
        let many = ModelConfig::from_json_str(r#"{"eos_token_id": [2, 32000]}"#).unwrap();
        assert_eq!(many.eos_token_ids(), vec![2, 32000]);
    }

    #[test]
    fn test_speech_config_requires_fields() {
        let config = ModelConfig::from_json_str(
            r#"{"sampling_rate": 44100, "base_chunk_size": 512, "chunk_compress_factor": 6, "latent_dim": 24}"#,
        )
        .unwrap();
        assert_eq!(config.speech_config().unwrap().chunk_size(), 3072);
        assert!(ModelConfig::default().speech_config().is_err());
    }
}
