//! Diffusion-style speech synthesis: text encoder, a fixed number of latent
//! denoising steps, then a voice decoder.

use std::sync::Arc;

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use xmodal_values::{Tensor, TensorMap};

use crate::error::{OnnxError, Result};
use crate::session::InferenceSession;

/// Acoustic constants of a diffusion speech model, read from its config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechModelConfig {
    pub sampling_rate: u32,
    pub base_chunk_size: usize,
    pub chunk_compress_factor: usize,
    pub latent_dim: usize,
}

impl SpeechModelConfig {
    /// Audio samples covered by one latent frame.
    pub fn chunk_size(&self) -> usize {
        self.base_chunk_size * self.chunk_compress_factor
    }

    pub fn latent_channels(&self) -> usize {
        self.latent_dim * self.chunk_compress_factor
    }
}

/// Number of latent frames needed for `max_duration` seconds of audio.
pub fn latent_length(max_duration: f32, sampling_rate: u32, chunk_size: usize) -> usize {
    if chunk_size == 0 || !max_duration.is_finite() || max_duration <= 0.0 {
        return 0;
    }
    (f64::from(max_duration) * f64::from(sampling_rate) / chunk_size as f64).ceil() as usize
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOutput {
    /// `[batch, samples]` audio.
    pub waveform: Tensor,
    /// Predicted durations in seconds, already divided by the speed factor.
    pub durations: Tensor,
}

/// Latent being refined plus the conditioning fixed for the whole loop.
/// Only the latent buffer changes between steps.
#[derive(Debug, Clone)]
pub struct LatentState {
    latents: Tensor,
    latent_mask: Tensor,
    num_steps: Tensor,
    style: Tensor,
    encoder_outputs: Tensor,
    attention_mask: Tensor,
}

impl LatentState {
    pub fn new(latents: Tensor, num_steps: usize, style: Tensor, encoder_outputs: Tensor, attention_mask: Tensor) -> Self {
        let dims = latents.dims();
        let (batch, length) = (dims.first().copied().unwrap_or(0), dims.last().copied().unwrap_or(0));
        Self {
            latent_mask: Tensor::full_f32(1.0, vec![batch, length]),
            num_steps: Tensor::full_f32(num_steps as f32, vec![batch]),
            latents,
            style,
            encoder_outputs,
            attention_mask,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.latents.dims().first().copied().unwrap_or(0)
    }

    pub fn latents(&self) -> &Tensor {
        &self.latents
    }

    pub fn into_latents(self) -> Tensor {
        self.latents
    }

    fn step_inputs(&self, step: usize) -> TensorMap {
        TensorMap::new()
            .with("style", self.style.clone())
            .with("noisy_latents", self.latents.clone())
            .with("latent_mask", self.latent_mask.clone())
            .with("encoder_outputs", self.encoder_outputs.clone())
            .with("attention_mask", self.attention_mask.clone())
            .with("timestep", Tensor::full_f32(step as f32, vec![self.batch_size()]))
            .with("num_inference_steps", self.num_steps.clone())
    }

    fn replace(&mut self, denoised: Tensor) -> Result<()> {
        if denoised.dims() != self.latents.dims() {
            return Err(OnnxError::InferenceFailed(format!(
                "denoiser returned {:?}, latent is {:?}",
                denoised.dims(),
                self.latents.dims()
            )));
        }
        self.latents = denoised;
        Ok(())
    }
}

/// Run exactly `steps` denoiser calls, replacing the latent after each.
pub fn run_denoising(denoiser: &dyn InferenceSession, state: &mut LatentState, steps: usize) -> Result<()> {
    if steps == 0 {
        return Err(OnnxError::configuration("num_inference_steps must be at least 1"));
    }
    for step in 0..steps {
        let mut outputs = denoiser.run(state.step_inputs(step))?;
        let denoised = outputs
            .remove("denoised_latents")
            .ok_or_else(|| OnnxError::MissingOutput { name: "denoised_latents".to_string() })?;
        state.replace(denoised)?;
        log::debug!("Denoising step {}/{}", step + 1, steps);
    }
    Ok(())
}

/// `len` draws from N(0, 1) using the injected random source.
pub fn standard_normal(len: usize, rng: &mut dyn RngCore) -> Vec<f32> {
    (0..len).map(|_| rng.sample::<f32, _>(StandardNormal)).collect()
}

/// Text encoder, latent denoiser and voice decoder of a diffusion TTS model.
pub struct DiffusionSpeechModel {
    text_encoder: Arc<dyn InferenceSession>,
    latent_denoiser: Arc<dyn InferenceSession>,
    voice_decoder: Arc<dyn InferenceSession>,
    config: SpeechModelConfig,
}

impl DiffusionSpeechModel {
    pub fn new(
        text_encoder: Arc<dyn InferenceSession>,
        latent_denoiser: Arc<dyn InferenceSession>,
        voice_decoder: Arc<dyn InferenceSession>,
        config: SpeechModelConfig,
    ) -> Result<Self> {
        if config.chunk_size() == 0 || config.latent_channels() == 0 {
            return Err(OnnxError::configuration(
                "speech model needs non-zero chunk sizes and latent_dim",
            ));
        }
        Ok(Self { text_encoder, latent_denoiser, voice_decoder, config })
    }

    pub fn config(&self) -> &SpeechModelConfig {
        &self.config
    }

    /// Synthesize speech for tokenized text conditioned on `style`.
    ///
    /// Higher `speed` shortens the predicted durations and therefore the
    /// latent and the waveform.
    pub fn generate_speech(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        style: &Tensor,
        num_inference_steps: usize,
        speed: f32,
        rng: &mut dyn RngCore,
    ) -> Result<SpeechOutput> {
        if num_inference_steps == 0 {
            return Err(OnnxError::configuration("num_inference_steps must be at least 1"));
        }
        if speed.is_nan() || speed <= 0.0 {
            return Err(OnnxError::configuration(format!("speed must be positive, got {speed}")));
        }

        let mut encoded = self.text_encoder.run(
            TensorMap::new()
                .with("input_ids", input_ids.clone())
                .with("attention_mask", attention_mask.clone())
                .with("style", style.clone()),
        )?;
        let encoder_outputs = encoded
            .remove("last_hidden_state")
            .ok_or_else(|| OnnxError::MissingOutput { name: "last_hidden_state".to_string() })?;
        let raw_durations = encoded
            .remove("durations")
            .ok_or_else(|| OnnxError::MissingOutput { name: "durations".to_string() })?;

        let durations = Tensor::from_f32(
            raw_durations.to_f32_lossy().into_iter().map(|d| d / speed).collect(),
            raw_durations.dims().to_vec(),
        )?;
        let max_duration = durations.max_f32()?.unwrap_or(0.0);
        let length = latent_length(max_duration, self.config.sampling_rate, self.config.chunk_size());
        if length == 0 {
            return Err(OnnxError::InferenceFailed(
                "text encoder predicted no speech duration".to_string(),
            ));
        }

        let batch = input_ids.dims().first().copied().unwrap_or(1);
        let channels = self.config.latent_channels();
        log::info!(
            "Synthesizing {:.2}s of speech: latent [{}, {}, {}], {} steps",
            max_duration,
            batch,
            channels,
            length,
            num_inference_steps
        );

        let noise = Tensor::from_f32(standard_normal(batch * channels * length, rng), vec![batch, channels, length])?;
        let mut state = LatentState::new(noise, num_inference_steps, style.clone(), encoder_outputs, attention_mask.clone());
        run_denoising(self.latent_denoiser.as_ref(), &mut state, num_inference_steps)?;

        let mut decoded = self
            .voice_decoder
            .run(TensorMap::new().with("latents", state.into_latents()))?;
        let waveform = decoded
            .remove("waveform")
            .ok_or_else(|| OnnxError::MissingOutput { name: "waveform".to_string() })?;
        Ok(SpeechOutput { waveform, durations })
    }
}
