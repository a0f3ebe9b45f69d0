/// Text-to-audio (text-to-speech)
///
/// Three model families:
/// - waveform models map token ids straight to `waveform`
/// - spectrogram models need speaker embeddings and a vocoder, which is
///   loaded on first use and then kept
/// - diffusion models run the denoising loop conditioned on a style tensor
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use xmodal_common::SpeechSettings;
use xmodal_onnx_loader::{DiffusionSpeechModel, InferenceSession};
use xmodal_tokenization::{EncodeOptions, TextTokenizer};
use xmodal_values::{Tensor, TensorMap};

use super::{rng_from_seed, TaskHandler};
use crate::error::{PipelineError, Result};
use crate::input::Batch;
use crate::media::RawAudio;
use crate::processor::{f32_from_le_bytes, ResourceLoader};
use crate::types::PipelineType;

/// Vocoder used when none is supplied.
pub const DEFAULT_VOCODER_ID: &str = "Xenova/speecht5_hifigan";

pub type VocoderLoader = Box<dyn Fn() -> Result<Arc<dyn InferenceSession>> + Send + Sync>;

/// A conditioning vector given inline, as a tensor, or by URL (raw little-endian f32).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingSource {
    Tensor(Tensor),
    Values(Vec<f32>),
    Url(String),
}

impl EmbeddingSource {
    /// Flat sources become `[1, n]`.
    fn resolve(&self, loader: Option<&Arc<dyn ResourceLoader>>) -> Result<Tensor> {
        let values = match self {
            Self::Tensor(tensor) => return Ok(tensor.clone()),
            Self::Values(values) => values.clone(),
            Self::Url(url) => {
                let loader = loader.ok_or_else(|| {
                    PipelineError::Processor(format!("cannot fetch '{url}': no resource loader configured"))
                })?;
                f32_from_le_bytes(&loader.load_bytes(url)?)?
            }
        };
        let len = values.len();
        Ok(Tensor::from_f32(values, vec![1, len])?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextToAudioOptions {
    /// Spectrogram models.
    pub speaker_embeddings: Option<EmbeddingSource>,
    /// Diffusion models.
    pub style: Option<EmbeddingSource>,
    pub num_inference_steps: usize,
    pub speed: f32,
    pub seed: Option<u64>,
}

impl Default for TextToAudioOptions {
    fn default() -> Self {
        let speech = SpeechSettings::default();
        Self {
            speaker_embeddings: None,
            style: None,
            num_inference_steps: speech.num_inference_steps,
            speed: speech.speed,
            seed: None,
        }
    }
}

enum SpeechModel {
    Waveform {
        model: Arc<dyn InferenceSession>,
        sampling_rate: u32,
    },
    Spectrogram {
        model: Arc<dyn InferenceSession>,
        vocoder: OnceCell<Arc<dyn InferenceSession>>,
        load_vocoder: VocoderLoader,
        sampling_rate: u32,
    },
    Diffusion {
        model: DiffusionSpeechModel,
    },
}

/// Text-to-speech handler.
///
/// Unlike the other handlers, a batched call does not return one output per
/// input: the waveforms of all inputs are concatenated, in order, into a
/// single [`RawAudio`].
pub struct TextToAudioPipeline {
    tokenizer: Arc<dyn TextTokenizer>,
    model: SpeechModel,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl TextToAudioPipeline {
    pub fn waveform(tokenizer: Arc<dyn TextTokenizer>, model: Arc<dyn InferenceSession>, sampling_rate: u32) -> Self {
        Self { tokenizer, model: SpeechModel::Waveform { model, sampling_rate }, loader: None }
    }

    /// `load_vocoder` runs at most once, on the first call.
    pub fn spectrogram(
        tokenizer: Arc<dyn TextTokenizer>,
        model: Arc<dyn InferenceSession>,
        sampling_rate: u32,
        load_vocoder: VocoderLoader,
    ) -> Self {
        let model = SpeechModel::Spectrogram { model, vocoder: OnceCell::new(), load_vocoder, sampling_rate };
        Self { tokenizer, model, loader: None }
    }

    pub fn diffusion(tokenizer: Arc<dyn TextTokenizer>, model: DiffusionSpeechModel) -> Self {
        Self { tokenizer, model: SpeechModel::Diffusion { model }, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn vocoder_loaded(&self) -> bool {
        matches!(&self.model, SpeechModel::Spectrogram { vocoder, .. } if vocoder.get().is_some())
    }

    fn condition(&self, source: Option<&EmbeddingSource>, name: &str) -> Result<Tensor> {
        source
            .ok_or_else(|| PipelineError::Configuration(format!("this model needs '{name}'")))?
            .resolve(self.loader.as_ref())
    }
}

fn waveform_audio(waveform: &Tensor, sampling_rate: u32) -> RawAudio {
    RawAudio::new(waveform.to_f32_lossy(), sampling_rate)
}

impl TaskHandler for TextToAudioPipeline {
    type Input = String;
    type Options = TextToAudioOptions;
    /// One clip holding the waveform of every input, in order.
    type Output = RawAudio;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::TextToAudio
    }

    fn process(&self, batch: Batch<String>, options: &TextToAudioOptions) -> Result<RawAudio> {
        let encoding = self
            .tokenizer
            .encode(batch.items(), &EncodeOptions::default().truncated(None))?;

        match &self.model {
            SpeechModel::Waveform { model, sampling_rate } => {
                let outputs = model.run(encoding.into_tensor_map())?;
                Ok(waveform_audio(outputs.require("waveform")?, *sampling_rate))
            }
            SpeechModel::Spectrogram { model, vocoder, load_vocoder, sampling_rate } => {
                let speaker_embeddings = self.condition(options.speaker_embeddings.as_ref(), "speaker_embeddings")?;
                let vocoder = vocoder.get_or_try_init(|| {
                    log::info!("No vocoder loaded yet, loading {DEFAULT_VOCODER_ID}");
                    load_vocoder()
                })?;
                let mut outputs = model.run(
                    TensorMap::new()
                        .with("input_ids", encoding.input_ids)
                        .with("speaker_embeddings", speaker_embeddings),
                )?;
                let spectrogram = outputs.take("spectrogram")?;
                let waves = vocoder.run(TensorMap::new().with("spectrogram", spectrogram))?;
                Ok(waveform_audio(waves.require("waveform")?, *sampling_rate))
            }
            SpeechModel::Diffusion { model } => {
                let style = self.condition(options.style.as_ref(), "style")?;
                let mut rng = rng_from_seed(options.seed);
                let speech = model.generate_speech(
                    &encoding.input_ids,
                    &encoding.attention_mask,
                    &style,
                    options.num_inference_steps,
                    options.speed,
                    &mut rng,
                )?;
                Ok(waveform_audio(&speech.waveform, model.config().sampling_rate))
            }
        }
    }
}
