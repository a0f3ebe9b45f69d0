/// Text classification (sentiment analysis)
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_onnx_loader::InferenceSession;
use xmodal_tokenization::{EncodeOptions, TextTokenizer};

use super::TaskHandler;
use crate::error::Result;
use crate::input::{Batch, Output};
use crate::model_config::ModelConfig;
use crate::postprocess::{classify, LabelScore};
use crate::types::PipelineType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextClassificationOptions {
    /// `None` (an explicit `null`) returns every label.
    pub top_k: Option<usize>,
}

impl Default for TextClassificationOptions {
    fn default() -> Self {
        Self { top_k: Some(1) }
    }
}

/// With `top_k == 1` the per-text lists collapse into one flat list, even
/// for a single text. Otherwise a single text gets one list and a batch a
/// list per text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClassificationOutput {
    Flat(Vec<LabelScore>),
    PerInput(Output<Vec<LabelScore>>),
}

pub struct TextClassificationPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    model: Arc<dyn InferenceSession>,
    config: ModelConfig,
}

impl TextClassificationPipeline {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, model: Arc<dyn InferenceSession>, config: ModelConfig) -> Self {
        Self { tokenizer, model, config }
    }
}

impl TaskHandler for TextClassificationPipeline {
    type Input = String;
    type Options = TextClassificationOptions;
    type Output = ClassificationOutput;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::TextClassification
    }

    fn process(&self, batch: Batch<String>, options: &TextClassificationOptions) -> Result<ClassificationOutput> {
        let encoding = self
            .tokenizer
            .encode(batch.items(), &EncodeOptions::default().truncated(None))?;
        let outputs = self.model.run(encoding.into_tensor_map())?;
        let logits = outputs.require("logits")?;

        let multi_label = self.config.is_multi_label();
        let ranked: Vec<Vec<LabelScore>> = logits
            .rows_f32()?
            .map(|row| classify(row, &self.config, options.top_k, multi_label))
            .collect();

        if options.top_k == Some(1) {
            return Ok(ClassificationOutput::Flat(ranked.into_iter().flatten().collect()));
        }
        Ok(ClassificationOutput::PerInput(batch.rewrap(ranked)?))
    }
}
