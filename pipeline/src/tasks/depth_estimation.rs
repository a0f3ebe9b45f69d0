/// Depth estimation
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_onnx_loader::InferenceSession;
use xmodal_values::Tensor;

use super::TaskHandler;
use crate::error::{PipelineError, Result};
use crate::input::{Batch, ImageInput, Output};
use crate::media::RawImage;
use crate::postprocess::{interpolate_bilinear, min_max_to_u8};
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DepthEstimationOptions {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthResult {
    /// Raw depth resized to the source image, `[h, w]`.
    pub predicted_depth: Tensor,
    /// Depth stretched to `0..=255`.
    pub depth: RawImage,
}

pub struct DepthEstimationPipeline {
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl DepthEstimationPipeline {
    pub fn new(processor: Arc<dyn ImageProcessor>, model: Arc<dyn InferenceSession>) -> Self {
        Self { processor, model, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl TaskHandler for DepthEstimationPipeline {
    type Input = ImageInput;
    type Options = DepthEstimationOptions;
    type Output = Output<DepthResult>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::DepthEstimation
    }

    fn process(&self, batch: Batch<ImageInput>, _options: &DepthEstimationOptions) -> Result<Self::Output> {
        let images = batch.map_items(|input| resolve_image(input, self.loader.as_ref()))?;
        let inputs = self.processor.process(images.items())?;
        let outputs = self.model.run(inputs)?;
        let predicted = outputs.require("predicted_depth")?;

        let mut results = Vec::with_capacity(images.len());
        for (i, image) in images.items().iter().enumerate() {
            let plane = predicted.index(i)?;
            let (h, w) = match plane.dims() {
                [h, w] | [1, h, w] => (*h, *w),
                dims => {
                    return Err(PipelineError::InputShape(format!("predicted_depth item must be [h, w], got {dims:?}")))
                }
            };
            let resized = interpolate_bilinear(&plane.to_f32_lossy(), (h, w), (image.height, image.width))?;
            let depth = RawImage::new(image.width, image.height, 1, min_max_to_u8(&resized))?;
            results.push(DepthResult {
                predicted_depth: Tensor::from_f32(resized, vec![image.height, image.width])?,
                depth,
            });
        }
        images.rewrap(results)
    }
}
