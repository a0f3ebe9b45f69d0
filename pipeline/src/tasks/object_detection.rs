/// Object detection (DETR-style heads)
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;

use super::TaskHandler;
use crate::error::Result;
use crate::input::{Batch, ImageInput, Output};
use crate::model_config::ModelConfig;
use crate::postprocess::{post_process_object_detection, DetectionResult};
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObjectDetectionOptions {
    pub threshold: f32,
    /// Boxes as fractions of the image size instead of pixels.
    pub percentage: bool,
}

impl Default for ObjectDetectionOptions {
    fn default() -> Self {
        Self { threshold: 0.9, percentage: false }
    }
}

pub struct ObjectDetectionPipeline {
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    config: ModelConfig,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl ObjectDetectionPipeline {
    pub fn new(processor: Arc<dyn ImageProcessor>, model: Arc<dyn InferenceSession>, config: ModelConfig) -> Self {
        Self { processor, model, config, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl TaskHandler for ObjectDetectionPipeline {
    type Input = ImageInput;
    type Options = ObjectDetectionOptions;
    type Output = Output<Vec<DetectionResult>>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ObjectDetection
    }

    fn process(&self, batch: Batch<ImageInput>, options: &ObjectDetectionOptions) -> Result<Self::Output> {
        let images = batch.map_items(|input| resolve_image(input, self.loader.as_ref()))?;
        let inputs = self.processor.process(images.items())?;
        let outputs = self.model.run(inputs)?;
        let logits = outputs.require("logits")?;
        let boxes = outputs.require("pred_boxes")?;

        let mut results = Vec::with_capacity(images.len());
        for (i, image) in images.items().iter().enumerate() {
            let pixel_size = (!options.percentage).then_some((image.height, image.width));
            let detections = post_process_object_detection(
                &logits.index(i)?,
                &boxes.index(i)?,
                options.threshold,
                pixel_size,
                &self.config,
            )?;
            log::debug!("Image {i}: {} detection(s) above {}", detections.len(), options.threshold);
            results.push(detections);
        }
        images.rewrap(results)
    }
}
