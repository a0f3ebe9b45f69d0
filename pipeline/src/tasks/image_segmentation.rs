/// Image segmentation
///
/// Multi-channel logits `[b, classes, h, w]` are semantic segmentation: one
/// mask per class that wins at least one pixel. A single channel is a
/// foreground matte in `0..1` and yields one unlabeled mask.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_onnx_loader::InferenceSession;
use xmodal_values::Tensor;

use super::{take_first_of, TaskHandler};
use crate::error::{PipelineError, Result};
use crate::input::{Batch, ImageInput};
use crate::media::RawImage;
use crate::model_config::ModelConfig;
use crate::postprocess::interpolate_bilinear;
use crate::processor::{resolve_image, ImageProcessor, ResourceLoader};
use crate::types::PipelineType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageSegmentationOptions {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentResult {
    pub label: Option<String>,
    pub score: Option<f32>,
    /// Single-channel mask at the source image size.
    pub mask: RawImage,
}

pub struct ImageSegmentationPipeline {
    processor: Arc<dyn ImageProcessor>,
    model: Arc<dyn InferenceSession>,
    config: ModelConfig,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl ImageSegmentationPipeline {
    pub fn new(processor: Arc<dyn ImageProcessor>, model: Arc<dyn InferenceSession>, config: ModelConfig) -> Self {
        Self { processor, model, config, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub(crate) fn resolve(&self, input: ImageInput) -> Result<RawImage> {
        resolve_image(input, self.loader.as_ref())
    }

    /// Segments one decoded image.
    pub fn segment(&self, image: &RawImage) -> Result<Vec<SegmentResult>> {
        let inputs = self.processor.process(std::slice::from_ref(image))?;
        let mut outputs = self.model.run(inputs)?;
        let prediction = take_first_of(&mut outputs, &["logits", "output", "alphas"])?.index(0)?;

        let (channels, height, width) = match prediction.dims() {
            [h, w] => (1, *h, *w),
            [c, h, w] => (*c, *h, *w),
            dims => {
                return Err(PipelineError::InputShape(format!("segmentation output must be [c, h, w], got {dims:?}")))
            }
        };
        if channels == 1 {
            return Ok(vec![matte(&prediction, (height, width), image)?]);
        }
        self.semantic(&prediction, channels, (height, width), image)
    }

    fn semantic(
        &self,
        logits: &Tensor,
        channels: usize,
        size: (usize, usize),
        image: &RawImage,
    ) -> Result<Vec<SegmentResult>> {
        let target = (image.height, image.width);
        let plane_len = size.0 * size.1;
        let data = logits.as_f32()?;
        let planes = (0..channels)
            .map(|c| interpolate_bilinear(&data[c * plane_len..(c + 1) * plane_len], size, target))
            .collect::<Result<Vec<_>>>()?;

        let pixels = image.pixel_count();
        let mut winners = vec![0usize; pixels];
        for (p, winner) in winners.iter_mut().enumerate() {
            let mut best = f32::NEG_INFINITY;
            for (c, plane) in planes.iter().enumerate() {
                if plane[p] > best {
                    best = plane[p];
                    *winner = c;
                }
            }
        }

        let mut segments = Vec::new();
        for class in 0..channels {
            if !winners.contains(&class) {
                continue;
            }
            let mask = winners.iter().map(|&w| if w == class { 255 } else { 0 }).collect();
            segments.push(SegmentResult {
                label: Some(self.config.label(class)),
                score: None,
                mask: RawImage::new(image.width, image.height, 1, mask)?,
            });
        }
        Ok(segments)
    }
}

/// `0..1` matte resized to the source image as an 8-bit mask.
fn matte(prediction: &Tensor, size: (usize, usize), image: &RawImage) -> Result<SegmentResult> {
    let scaled: Vec<f32> = prediction.to_f32_lossy().into_iter().map(|v| v * 255.0).collect();
    let resized = interpolate_bilinear(&scaled, size, (image.height, image.width))?;
    let mask = resized.into_iter().map(|v| v.clamp(0.0, 255.0) as u8).collect();
    Ok(SegmentResult { label: None, score: None, mask: RawImage::new(image.width, image.height, 1, mask)? })
}

impl TaskHandler for ImageSegmentationPipeline {
    type Input = ImageInput;
    type Options = ImageSegmentationOptions;
    type Output = Vec<SegmentResult>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ImageSegmentation
    }

    /// The batch ceiling is one image, so the result is that image's segments.
    fn process(&self, batch: Batch<ImageInput>, _options: &ImageSegmentationOptions) -> Result<Vec<SegmentResult>> {
        let mut segments = Vec::new();
        for input in batch.into_items() {
            let image = self.resolve(input)?;
            segments.extend(self.segment(&image)?);
        }
        Ok(segments)
    }
}
