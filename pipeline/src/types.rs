/// Pipeline type enum
///
/// One variant per supported task. Task tags are the HuggingFace
/// `pipeline_tag` strings; some tasks accept an alias.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
    #[serde(rename = "text-classification", alias = "sentiment-analysis")]
    TextClassification,

    #[serde(rename = "question-answering")]
    QuestionAnswering,

    #[serde(rename = "fill-mask")]
    FillMask,

    /// Token embeddings, optionally pooled (sentence-transformers)
    #[serde(rename = "feature-extraction", alias = "embeddings")]
    FeatureExtraction,

    #[serde(rename = "image-feature-extraction")]
    ImageFeatureExtraction,

    /// Causal LMs, plain prompts or chats
    #[serde(rename = "text-generation")]
    TextGeneration,

    /// Waveform, spectrogram + vocoder, or diffusion speech models
    #[serde(rename = "text-to-audio", alias = "text-to-speech")]
    TextToAudio,

    #[serde(rename = "zero-shot-image-classification")]
    ZeroShotImageClassification,

    #[serde(rename = "audio-classification")]
    AudioClassification,

    #[serde(rename = "object-detection")]
    ObjectDetection,

    #[serde(rename = "image-segmentation")]
    ImageSegmentation,

    #[serde(rename = "background-removal")]
    BackgroundRemoval,

    #[serde(rename = "depth-estimation")]
    DepthEstimation,

    #[serde(rename = "image-to-image")]
    ImageToImage,
}

impl PipelineType {
    pub const ALL: [PipelineType; 14] = [
        Self::TextClassification,
        Self::QuestionAnswering,
        Self::FillMask,
        Self::FeatureExtraction,
        Self::ImageFeatureExtraction,
        Self::TextGeneration,
        Self::TextToAudio,
        Self::ZeroShotImageClassification,
        Self::AudioClassification,
        Self::ObjectDetection,
        Self::ImageSegmentation,
        Self::BackgroundRemoval,
        Self::DepthEstimation,
        Self::ImageToImage,
    ];

    /// Convert to HuggingFace pipeline_tag string
    pub fn to_hf_tag(&self) -> &'static str {
        match self {
            Self::TextClassification => "text-classification",
            Self::QuestionAnswering => "question-answering",
            Self::FillMask => "fill-mask",
            Self::FeatureExtraction => "feature-extraction",
            Self::ImageFeatureExtraction => "image-feature-extraction",
            Self::TextGeneration => "text-generation",
            Self::TextToAudio => "text-to-audio",
            Self::ZeroShotImageClassification => "zero-shot-image-classification",
            Self::AudioClassification => "audio-classification",
            Self::ObjectDetection => "object-detection",
            Self::ImageSegmentation => "image-segmentation",
            Self::BackgroundRemoval => "background-removal",
            Self::DepthEstimation => "depth-estimation",
            Self::ImageToImage => "image-to-image",
        }
    }

    /// Parse from a pipeline_tag string or one of its aliases
    pub fn from_hf_tag(tag: &str) -> Option<Self> {
        match tag {
            "sentiment-analysis" => Some(Self::TextClassification),
            "embeddings" => Some(Self::FeatureExtraction),
            "text-to-speech" => Some(Self::TextToAudio),
            _ => Self::ALL.iter().copied().find(|t| t.to_hf_tag() == tag),
        }
    }

    /// Largest batch the task accepts; larger batches are an error, never truncated.
    pub fn batch_ceiling(&self) -> Option<usize> {
        match self {
            Self::ObjectDetection | Self::ImageSegmentation | Self::BackgroundRemoval => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hf_tag())
    }
}
