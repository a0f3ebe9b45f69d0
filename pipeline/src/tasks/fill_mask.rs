/// Fill-mask: rank replacements for the mask token.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_onnx_loader::InferenceSession;
use xmodal_tokenization::{EncodeOptions, TextTokenizer};
use xmodal_values::math::{softmax, top_k};

use super::TaskHandler;
use crate::error::{PipelineError, Result};
use crate::input::{Batch, Output};
use crate::types::PipelineType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FillMaskOptions {
    pub top_k: Option<usize>,
}

impl Default for FillMaskOptions {
    fn default() -> Self {
        Self { top_k: Some(5) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillMaskResult {
    pub score: f32,
    pub token: i64,
    pub token_str: String,
    /// The input with the mask replaced, special tokens removed.
    pub sequence: String,
}

pub struct FillMaskPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    model: Arc<dyn InferenceSession>,
}

impl FillMaskPipeline {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, model: Arc<dyn InferenceSession>) -> Self {
        Self { tokenizer, model }
    }

    fn missing_mask(&self) -> PipelineError {
        PipelineError::MissingToken {
            token: self.tokenizer.mask_token().unwrap_or("[MASK]").to_string(),
        }
    }
}

impl TaskHandler for FillMaskPipeline {
    type Input = String;
    type Options = FillMaskOptions;
    type Output = Output<Vec<FillMaskResult>>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::FillMask
    }

    fn process(&self, batch: Batch<String>, options: &FillMaskOptions) -> Result<Self::Output> {
        let mask_id = self.tokenizer.mask_token_id().ok_or_else(|| self.missing_mask())?;
        let encoding = self
            .tokenizer
            .encode(batch.items(), &EncodeOptions::default().truncated(None))?;

        // Check every row before running the model.
        let mut mask_positions = Vec::with_capacity(batch.len());
        for row in 0..encoding.batch_size() {
            let ids = encoding.row_ids(row)?;
            let position = ids.iter().position(|&id| id == mask_id).ok_or_else(|| self.missing_mask())?;
            mask_positions.push((ids.to_vec(), position));
        }

        let outputs = self.model.run(encoding.into_tensor_map())?;
        let logits = outputs.require("logits")?;

        let mut results = Vec::with_capacity(mask_positions.len());
        for (row, (ids, position)) in mask_positions.into_iter().enumerate() {
            let at_mask = logits.index(row)?.select(0, position as isize)?;
            let probs = softmax(at_mask.as_f32()?);
            let candidates = top_k(&probs, options.top_k)
                .into_iter()
                .map(|(token, score)| {
                    let token = token as i64;
                    let mut sequence = ids.clone();
                    sequence[position] = token;
                    Ok(FillMaskResult {
                        score,
                        token,
                        token_str: self.tokenizer.decode(&[token], false)?,
                        sequence: self.tokenizer.decode(&sequence, true)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            results.push(candidates);
        }
        batch.rewrap(results)
    }
}
