/// Feature extraction (text embeddings)
///
/// Output order is fixed: pool, then L2-normalize, then quantize.
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;
use xmodal_tokenization::{EncodeOptions, TextTokenizer};
use xmodal_values::math::l2_normalize_last_axis;
use xmodal_values::Tensor;

use super::{take_first_of, TaskHandler};
use crate::error::{PipelineError, Result};
use crate::input::Batch;
use crate::postprocess::{mean_pooling, quantize_embeddings, Precision};
use crate::types::PipelineType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    #[default]
    None,
    /// Attention-mask weighted mean over tokens
    Mean,
    #[serde(alias = "first_token")]
    Cls,
    #[serde(alias = "last_token")]
    Eos,
}

impl FromStr for Pooling {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "mean" => Ok(Self::Mean),
            "cls" | "first_token" => Ok(Self::Cls),
            "eos" | "last_token" => Ok(Self::Eos),
            other => Err(PipelineError::Configuration(format!("pooling method '{other}' not supported"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureExtractionOptions {
    pub pooling: Pooling,
    pub normalize: bool,
    pub quantize: bool,
    pub precision: Precision,
}

impl Default for FeatureExtractionOptions {
    fn default() -> Self {
        Self { pooling: Pooling::None, normalize: false, quantize: false, precision: Precision::Binary }
    }
}

pub struct FeatureExtractionPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    model: Arc<dyn InferenceSession>,
}

impl FeatureExtractionPipeline {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, model: Arc<dyn InferenceSession>) -> Self {
        Self { tokenizer, model }
    }
}

impl TaskHandler for FeatureExtractionPipeline {
    type Input = String;
    type Options = FeatureExtractionOptions;
    type Output = Tensor;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::FeatureExtraction
    }

    fn process(&self, batch: Batch<String>, options: &FeatureExtractionOptions) -> Result<Tensor> {
        let encoding = self
            .tokenizer
            .encode(batch.items(), &EncodeOptions::default().truncated(None))?;
        let attention_mask = encoding.attention_mask.clone();
        let mut outputs = self.model.run(encoding.into_tensor_map())?;
        let hidden = take_first_of(&mut outputs, &["last_hidden_state", "logits", "token_embeddings"])?;

        let mut result = match options.pooling {
            Pooling::None => hidden,
            Pooling::Mean => mean_pooling(&hidden, &attention_mask)?,
            Pooling::Cls => hidden.select(1, 0)?,
            Pooling::Eos => hidden.select(1, -1)?,
        };
        if options.normalize {
            result = l2_normalize_last_axis(&result)?;
        }
        if options.quantize {
            result = quantize_embeddings(&result, options.precision)?;
        }
        log::debug!("Embeddings {:?} ({:?} pooling)", result.dims(), options.pooling);
        Ok(result)
    }
}
