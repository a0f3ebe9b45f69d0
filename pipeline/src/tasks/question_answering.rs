/// Extractive question answering
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_onnx_loader::InferenceSession;
use xmodal_tokenization::{EncodeOptions, TextTokenizer};

use super::TaskHandler;
use crate::error::{PipelineError, Result};
use crate::input::{Batch, Output, QaInput};
use crate::postprocess::{context_mask, score_spans};
use crate::types::PipelineType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuestionAnsweringOptions {
    pub top_k: usize,
    /// Context for questions passed as plain strings.
    pub context: Option<String>,
}

impl Default for QuestionAnsweringOptions {
    fn default() -> Self {
        Self { top_k: 1, context: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub score: f32,
}

/// `top_k == 1` yields one answer per question, otherwise a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuestionAnsweringOutput {
    Best(Output<Answer>),
    Ranked(Output<Vec<Answer>>),
}

pub struct QuestionAnsweringPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    model: Arc<dyn InferenceSession>,
}

impl QuestionAnsweringPipeline {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, model: Arc<dyn InferenceSession>) -> Self {
        Self { tokenizer, model }
    }

    fn answers_for_row(
        &self,
        ids: &[i64],
        attention: &[i64],
        start_logits: &[f32],
        end_logits: &[f32],
        top_k: usize,
    ) -> Result<Vec<Answer>> {
        let sep_id = self.tokenizer.sep_token_id().ok_or_else(missing_separator)?;
        let sep_index = ids.iter().position(|&id| id == sep_id).ok_or_else(missing_separator)?;

        let valid = context_mask(ids, attention, sep_index, self.tokenizer.all_special_ids());
        score_spans(start_logits, end_logits, &valid, top_k)
            .into_iter()
            .map(|span| {
                Ok(Answer {
                    answer: self.tokenizer.decode(&ids[span.start..=span.end], true)?,
                    score: span.score,
                })
            })
            .collect()
    }
}

fn missing_separator() -> PipelineError {
    PipelineError::MissingToken { token: "sep_token".to_string() }
}

impl TaskHandler for QuestionAnsweringPipeline {
    type Input = QaInput;
    type Options = QuestionAnsweringOptions;
    type Output = QuestionAnsweringOutput;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::QuestionAnswering
    }

    fn process(&self, batch: Batch<QaInput>, options: &QuestionAnsweringOptions) -> Result<Self::Output> {
        if options.top_k == 0 {
            return Err(PipelineError::configuration("top_k must be at least 1"));
        }
        let pairs = batch
            .items()
            .iter()
            .map(|item| {
                let context = item
                    .context
                    .clone()
                    .or_else(|| options.context.clone())
                    .ok_or_else(|| PipelineError::input_shape("question has no context"))?;
                Ok((item.question.clone(), context))
            })
            .collect::<Result<Vec<_>>>()?;

        let encoding = self
            .tokenizer
            .encode_pairs(&pairs, &EncodeOptions::default().truncated(None))?;
        let outputs = self.model.run(encoding.clone().into_tensor_map())?;
        let start_logits = outputs.require("start_logits")?;
        let end_logits = outputs.require("end_logits")?;

        let mut per_question = Vec::with_capacity(pairs.len());
        for (row, (start, end)) in start_logits.rows_f32()?.zip(end_logits.rows_f32()?).enumerate() {
            let answers =
                self.answers_for_row(encoding.row_ids(row)?, encoding.row_mask(row)?, start, end, options.top_k)?;
            per_question.push(answers);
        }

        if options.top_k == 1 {
            let best = per_question
                .into_iter()
                .map(|answers| {
                    answers
                        .into_iter()
                        .next()
                        .ok_or_else(|| PipelineError::input_shape("no candidate span in the input"))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(QuestionAnsweringOutput::Best(batch.rewrap(best)?));
        }
        Ok(QuestionAnsweringOutput::Ranked(batch.rewrap(per_question)?))
    }
}
