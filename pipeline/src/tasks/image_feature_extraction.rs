/// Image feature extraction
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;
use xmodal_values::{Tensor, TensorMap};

use super::{take_first_of, TaskHandler};
use crate::error::Result;
use crate::input::{Batch, ImageInput};
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageFeatureExtractionOptions {
    /// Return `pooler_output` instead of the token features.
    pub pool: bool,
}

pub struct ImageFeatureExtractionPipeline {
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl ImageFeatureExtractionPipeline {
    pub fn new(processor: Arc<dyn ImageProcessor>, model: Arc<dyn InferenceSession>) -> Self {
        Self { processor, model, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl TaskHandler for ImageFeatureExtractionPipeline {
    type Input = ImageInput;
    type Options = ImageFeatureExtractionOptions;
    type Output = Tensor;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ImageFeatureExtraction
    }

    fn process(&self, batch: Batch<ImageInput>, options: &ImageFeatureExtractionOptions) -> Result<Tensor> {
        let images = batch.map_items(|input| resolve_image(input, self.loader.as_ref()))?;
        let mut processed = self.processor.process(images.items())?;
        let pixel_values = processed.take("pixel_values")?;
        let mut outputs = self.model.run(TensorMap::new().with("pixel_values", pixel_values))?;

        if options.pool {
            return take_first_of(&mut outputs, &["pooler_output"]);
        }
        take_first_of(&mut outputs, &["last_hidden_state", "logits", "image_embeds"])
    }
}
