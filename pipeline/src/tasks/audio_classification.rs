/// Audio classification
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;

use super::TaskHandler;
use crate::error::Result;
use crate::input::{AudioInput, Batch, Output};
use crate::model_config::ModelConfig;
use crate::postprocess::{classify, LabelScore};
use crate::processor::{resolve_audio, AudioProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioClassificationOptions {
    pub top_k: Option<usize>,
}

impl Default for AudioClassificationOptions {
    fn default() -> Self {
        Self { top_k: Some(5) }
    }
}

pub struct AudioClassificationPipeline {
    processor: Arc<dyn AudioProcessor>,
    model: Arc<dyn InferenceSession>,
    config: ModelConfig,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl AudioClassificationPipeline {
    pub fn new(processor: Arc<dyn AudioProcessor>, model: Arc<dyn InferenceSession>, config: ModelConfig) -> Self {
        Self { processor, model, config, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl TaskHandler for AudioClassificationPipeline {
    type Input = AudioInput;
    type Options = AudioClassificationOptions;
    type Output = Output<Vec<LabelScore>>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::AudioClassification
    }

    /// Each clip runs through the model on its own; clips differ in length.
    fn process(&self, batch: Batch<AudioInput>, options: &AudioClassificationOptions) -> Result<Self::Output> {
        let sampling_rate = self.processor.sampling_rate();
        let clips = batch.map_items(|input| resolve_audio(input, self.loader.as_ref(), sampling_rate))?;

        let mut results = Vec::with_capacity(clips.len());
        for clip in clips.items() {
            let inputs = self.processor.process(clip)?;
            let outputs = self.model.run(inputs)?;
            let logits = outputs.require("logits")?.index(0)?;
            results.push(classify(logits.as_f32()?, &self.config, options.top_k, false));
        }
        clips.rewrap(results)
    }
}
