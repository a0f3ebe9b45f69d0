/// Background removal: segmentation matte applied as alpha.
use serde::Deserialize;

use super::image_segmentation::ImageSegmentationPipeline;
use super::TaskHandler;
use crate::error::{PipelineError, Result};
use crate::input::{Batch, ImageInput};
use crate::media::RawImage;
use crate::types::PipelineType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackgroundRemovalOptions {}

pub struct BackgroundRemovalPipeline {
    segmenter: ImageSegmentationPipeline,
}

impl BackgroundRemovalPipeline {
    pub fn new(segmenter: ImageSegmentationPipeline) -> Self {
        Self { segmenter }
    }
}

impl TaskHandler for BackgroundRemovalPipeline {
    type Input = ImageInput;
    type Options = BackgroundRemovalOptions;
    /// Always a list, even for a single image.
    type Output = Vec<RawImage>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::BackgroundRemoval
    }

    fn process(&self, batch: Batch<ImageInput>, _options: &BackgroundRemovalOptions) -> Result<Vec<RawImage>> {
        let mut results = Vec::with_capacity(batch.len());
        for input in batch.into_items() {
            let image = self.segmenter.resolve(input)?;
            let segments = self.segmenter.segment(&image)?;
            let matte = segments
                .first()
                .ok_or_else(|| PipelineError::Processor("segmentation produced no mask".to_string()))?;
            results.push(image.put_alpha(&matte.mask)?);
        }
        Ok(results)
    }
}
