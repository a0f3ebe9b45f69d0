//! xmodal pipeline crate
//!
//! Task handlers behind one call convention, built on the lower crates:
//! - **`xmodal-values`**: tensors and stable math
//! - **`xmodal-tokenization`**: the `TextTokenizer` seam
//! - **`xmodal-onnx-loader`**: model sessions, the generation loop and the
//!   denoising loop
//!
//! Each call runs the same chain: normalize input, enforce the batch
//! ceiling, preprocess, invoke the model, post-process, re-wrap.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use xmodal_onnx_loader::OnnxSession;
//! use xmodal_pipeline::{ModelConfig, Pipeline, TextClassificationPipeline};
//! use xmodal_tokenization::HfTokenizer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tokenizer = Arc::new(HfTokenizer::from_dir("models/sst2")?);
//! let model = Arc::new(OnnxSession::load("models/sst2/onnx/model.onnx")?);
//! let config = ModelConfig::from_file("models/sst2/config.json")?;
//!
//! let pipeline = Pipeline::from(TextClassificationPipeline::new(tokenizer, model, config));
//! let result = pipeline.call(json!(["I love it", "I hate it"]), json!({"top_k": 1}))?;
//! println!("{result}"); // [{"label":"POSITIVE","score":0.99},{"label":"NEGATIVE","score":0.98}]
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod input;
pub mod media;
pub mod model_config;
pub mod postprocess;
pub mod processor;
pub mod tasks;
pub mod types;

pub use dispatch::Pipeline;
pub use error::{PipelineError, Result};
pub use input::{AudioInput, Batch, ImageInput, InputItem, Output, PipelineInput, QaInput, TextInput};
pub use media::{RawAudio, RawImage};
pub use model_config::ModelConfig;
pub use postprocess::{BoundingBox, DetectionResult, LabelScore, Precision};
pub use processor::{AudioProcessor, ImageProcessor, ResourceLoader};
pub use tasks::TaskHandler;
pub use types::PipelineType;

pub use tasks::audio_classification::AudioClassificationPipeline;
pub use tasks::background_removal::BackgroundRemovalPipeline;
pub use tasks::depth_estimation::{DepthEstimationPipeline, DepthResult};
pub use tasks::feature_extraction::{FeatureExtractionPipeline, Pooling};
pub use tasks::fill_mask::{FillMaskPipeline, FillMaskResult};
pub use tasks::image_feature_extraction::ImageFeatureExtractionPipeline;
pub use tasks::image_segmentation::{ImageSegmentationPipeline, SegmentResult};
pub use tasks::image_to_image::ImageToImagePipeline;
pub use tasks::object_detection::ObjectDetectionPipeline;
pub use tasks::question_answering::{Answer, QuestionAnsweringPipeline};
pub use tasks::text_classification::TextClassificationPipeline;
pub use tasks::text_generation::{GeneratedContent, GeneratedText, TextGenerationPipeline};
pub use tasks::text_to_audio::{EmbeddingSource, TextToAudioPipeline, DEFAULT_VOCODER_ID};
pub use tasks::zero_shot_image_classification::ZeroShotImageClassificationPipeline;
