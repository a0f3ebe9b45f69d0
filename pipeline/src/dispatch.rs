/// Closed dispatch over the task handlers
///
/// One variant per [`PipelineType`]; `call` routes the caller-facing JSON
/// contract to the typed handler.
use serde_json::Value;

use crate::error::Result;
use crate::tasks::audio_classification::AudioClassificationPipeline;
use crate::tasks::background_removal::BackgroundRemovalPipeline;
use crate::tasks::depth_estimation::DepthEstimationPipeline;
use crate::tasks::feature_extraction::FeatureExtractionPipeline;
use crate::tasks::fill_mask::FillMaskPipeline;
use crate::tasks::image_feature_extraction::ImageFeatureExtractionPipeline;
use crate::tasks::image_segmentation::ImageSegmentationPipeline;
use crate::tasks::image_to_image::ImageToImagePipeline;
use crate::tasks::object_detection::ObjectDetectionPipeline;
use crate::tasks::question_answering::QuestionAnsweringPipeline;
use crate::tasks::text_classification::TextClassificationPipeline;
use crate::tasks::text_generation::TextGenerationPipeline;
use crate::tasks::text_to_audio::TextToAudioPipeline;
use crate::tasks::zero_shot_image_classification::ZeroShotImageClassificationPipeline;
use crate::tasks::TaskHandler;
use crate::types::PipelineType;

pub enum Pipeline {
    TextClassification(TextClassificationPipeline),
    QuestionAnswering(QuestionAnsweringPipeline),
    FillMask(FillMaskPipeline),
    FeatureExtraction(FeatureExtractionPipeline),
    ImageFeatureExtraction(ImageFeatureExtractionPipeline),
    TextGeneration(TextGenerationPipeline),
    TextToAudio(TextToAudioPipeline),
    ZeroShotImageClassification(ZeroShotImageClassificationPipeline),
    AudioClassification(AudioClassificationPipeline),
    ObjectDetection(ObjectDetectionPipeline),
    ImageSegmentation(ImageSegmentationPipeline),
    BackgroundRemoval(BackgroundRemovalPipeline),
    DepthEstimation(DepthEstimationPipeline),
    ImageToImage(ImageToImagePipeline),
}

/// Expands `$body` once per variant with `$h` bound to the handler.
macro_rules! with_handler {
    ($pipeline:expr, $h:ident => $body:expr) => {
        match $pipeline {
            Pipeline::TextClassification($h) => $body,
            Pipeline::QuestionAnswering($h) => $body,
            Pipeline::FillMask($h) => $body,
            Pipeline::FeatureExtraction($h) => $body,
            Pipeline::ImageFeatureExtraction($h) => $body,
            Pipeline::TextGeneration($h) => $body,
            Pipeline::TextToAudio($h) => $body,
            Pipeline::ZeroShotImageClassification($h) => $body,
            Pipeline::AudioClassification($h) => $body,
            Pipeline::ObjectDetection($h) => $body,
            Pipeline::ImageSegmentation($h) => $body,
            Pipeline::BackgroundRemoval($h) => $body,
            Pipeline::DepthEstimation($h) => $body,
            Pipeline::ImageToImage($h) => $body,
        }
    };
}

impl Pipeline {
    pub fn pipeline_type(&self) -> PipelineType {
        with_handler!(self, h => h.pipeline_type())
    }

    /// `handler(inputs, options) -> result`. Pass `Value::Null` for default options.
    pub fn call(&self, inputs: Value, options: Value) -> Result<Value> {
        with_handler!(self, h => h.call_json(&inputs, &options))
    }
}

macro_rules! impl_from_handler {
    ($($variant:ident($handler:ty)),* $(,)?) => {
        $(
            impl From<$handler> for Pipeline {
                fn from(handler: $handler) -> Self {
                    Pipeline::$variant(handler)
                }
            }
        )*
    };
}

impl_from_handler!(
    TextClassification(TextClassificationPipeline),
    QuestionAnswering(QuestionAnsweringPipeline),
    FillMask(FillMaskPipeline),
    FeatureExtraction(FeatureExtractionPipeline),
    ImageFeatureExtraction(ImageFeatureExtractionPipeline),
    TextGeneration(TextGenerationPipeline),
    TextToAudio(TextToAudioPipeline),
    ZeroShotImageClassification(ZeroShotImageClassificationPipeline),
    AudioClassification(AudioClassificationPipeline),
    ObjectDetection(ObjectDetectionPipeline),
    ImageSegmentation(ImageSegmentationPipeline),
    BackgroundRemoval(BackgroundRemovalPipeline),
    DepthEstimation(DepthEstimationPipeline),
    ImageToImage(ImageToImagePipeline),
);
