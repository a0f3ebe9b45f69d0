/// Image-to-image (super-resolution, restoration)
use std::sync::Arc;

use serde::Deserialize;
use xmodal_onnx_loader::InferenceSession;
use xmodal_values::Tensor;

use super::{unbatch, TaskHandler};
use crate::error::{PipelineError, Result};
use crate::input::{Batch, ImageInput, Output};
use crate::media::RawImage;
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageToImageOptions {}

pub struct ImageToImagePipeline {
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl ImageToImagePipeline {
    pub fn new(processor: Arc<dyn ImageProcessor>, model: Arc<dyn InferenceSession>) -> Self {
        Self { processor, model, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

/// `[c, h, w]` in `0..1` to an interleaved 8-bit image.
fn reconstruction_to_image(planes: &Tensor) -> Result<RawImage> {
    let (channels, height, width) = match planes.dims() {
        [c, h, w] => (*c, *h, *w),
        dims => return Err(PipelineError::InputShape(format!("reconstruction must be [c, h, w], got {dims:?}"))),
    };
    let values = planes.as_f32()?;
    let plane = height * width;
    let mut data = Vec::with_capacity(values.len());
    for p in 0..plane {
        for c in 0..channels {
            data.push((values[c * plane + p].clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    RawImage::new(width, height, channels, data)
}

impl TaskHandler for ImageToImagePipeline {
    type Input = ImageInput;
    type Options = ImageToImageOptions;
    type Output = Output<RawImage>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ImageToImage
    }

    fn process(&self, batch: Batch<ImageInput>, _options: &ImageToImageOptions) -> Result<Self::Output> {
        let images = batch.map_items(|input| resolve_image(input, self.loader.as_ref()))?;
        let inputs = self.processor.process(images.items())?;
        let outputs = self.model.run(inputs)?;
        let reconstruction = outputs.require("reconstruction")?;

        let results = unbatch(reconstruction)?
            .iter()
            .map(reconstruction_to_image)
            .collect::<Result<Vec<_>>>()?;
        images.rewrap(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruction_is_clamped_and_interleaved() {
        let planes = Tensor::from_f32(vec![0.0, 1.5, -1.0, 0.5], vec![2, 1, 2]).unwrap();
        let image = reconstruction_to_image(&planes).unwrap();
        assert_eq!((image.width, image.height, image.channels), (2, 1, 2));
        assert_eq!(image.data, vec![0, 0, 255, 128]);
    }
}
