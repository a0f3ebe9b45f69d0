/// Zero-shot image classification (CLIP, SigLIP)
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;
use xmodal_tokenization::{EncodeOptions, TextTokenizer};
use xmodal_values::math::{sigmoid_all, softmax};

use super::TaskHandler;
use crate::error::{PipelineError, Result};
use crate::input::{Batch, ImageInput, Output};
use crate::model_config::ModelConfig;
use crate::postprocess::LabelScore;
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

pub const DEFAULT_HYPOTHESIS_TEMPLATE: &str = "This is a photo of {}";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZeroShotImageClassificationOptions {
    pub candidate_labels: Vec<String>,
    /// `{}` is replaced by each label.
    pub hypothesis_template: String,
}

impl Default for ZeroShotImageClassificationOptions {
    fn default() -> Self {
        Self { candidate_labels: Vec::new(), hypothesis_template: DEFAULT_HYPOTHESIS_TEMPLATE.to_string() }
    }
}

pub struct ZeroShotImageClassificationPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    config: ModelConfig,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl ZeroShotImageClassificationPipeline {
    pub fn new(
        tokenizer: Arc<dyn TextTokenizer>,
        processor: Arc<dyn ImageProcessor>,
        model: Arc<dyn InferenceSession>,
        config: ModelConfig,
    ) -> Self {
        Self { tokenizer, processor, model, config, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl TaskHandler for ZeroShotImageClassificationPipeline {
    type Input = ImageInput;
    type Options = ZeroShotImageClassificationOptions;
    type Output = Output<Vec<LabelScore>>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ZeroShotImageClassification
    }

    fn process(&self, batch: Batch<ImageInput>, options: &ZeroShotImageClassificationOptions) -> Result<Self::Output> {
        if options.candidate_labels.is_empty() {
            return Err(PipelineError::configuration("candidate_labels must not be empty"));
        }
        let texts: Vec<String> = options
            .candidate_labels
            .iter()
            .map(|label| options.hypothesis_template.replacen("{}", label, 1))
            .collect();

        // SigLIP was trained on fixed-width text.
        let siglip = self.config.is_siglip();
        let encode_options = if siglip {
            EncodeOptions::default().padded_to_max_length(None)
        } else {
            EncodeOptions::default().truncated(None)
        };
        let mut inputs = self.tokenizer.encode(&texts, &encode_options)?.into_tensor_map();

        let batch = batch.map_items(|input| resolve_image(input, self.loader.as_ref()))?;
        let mut processed = self.processor.process(batch.items())?;
        inputs.insert("pixel_values", processed.take("pixel_values")?);

        let outputs = self.model.run(inputs)?;
        let logits = outputs.require("logits_per_image")?;

        let mut per_image = Vec::with_capacity(batch.len());
        for row in logits.rows_f32()? {
            let probs = if siglip { sigmoid_all(row) } else { softmax(row) };
            let mut ranked: Vec<LabelScore> = probs
                .into_iter()
                .zip(&options.candidate_labels)
                .map(|(score, label)| LabelScore { label: label.clone(), score })
                .collect();
            ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            per_image.push(ranked);
        }
        batch.rewrap(per_image)
    }
}
