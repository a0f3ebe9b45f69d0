//! Diffusion speech loop tests with in-memory sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use xmodal_onnx_loader::{
    latent_length, DiffusionSpeechModel, InferenceSession, OnnxError, Result, SpeechModelConfig, TensorSpec,
};
use xmodal_values::{Tensor, TensorMap};

const CONFIG: SpeechModelConfig = SpeechModelConfig {
    sampling_rate: 16,
    base_chunk_size: 2,
    chunk_compress_factor: 2,
    latent_dim: 3,
};

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Text encoder predicting a fixed duration per batch row.
struct FixedEncoder {
    durations: Vec<f32>,
}

impl InferenceSession for FixedEncoder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap> {
        let ids = inputs.require("input_ids")?;
        let (batch, seq) = (ids.dims()[0], ids.dims()[1]);
        assert!(inputs.contains("style"));
        Ok(TensorMap::new()
            .with("last_hidden_state", Tensor::zeros_f32(vec![batch, seq, 8]))
            .with("durations", Tensor::from_f32(self.durations.clone(), vec![batch])?))
    }

    fn inputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn outputs(&self) -> &[TensorSpec] {
        &[]
    }
}

/// Adds one to the latent on every call and counts calls.
#[derive(Default)]
struct CountingDenoiser {
    calls: AtomicUsize,
}

impl InferenceSession for CountingDenoiser {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap> {
        let step = self.calls.fetch_add(1, Ordering::SeqCst);
        let timestep = inputs.require("timestep")?.as_f32()?;
        assert!(timestep.iter().all(|&t| t == step as f32));
        for name in ["style", "latent_mask", "encoder_outputs", "attention_mask", "num_inference_steps"] {
            inputs.require(name)?;
        }
        let latents = inputs.require("noisy_latents")?;
        let next: Vec<f32> = latents.as_f32()?.iter().map(|x| x + 1.0).collect();
        Ok(TensorMap::new().with("denoised_latents", Tensor::from_f32(next, latents.dims().to_vec())?))
    }

    fn inputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn outputs(&self) -> &[TensorSpec] {
        &[]
    }
}

/// Emits one sample per latent frame chunk.
struct FrameDecoder;

impl InferenceSession for FrameDecoder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap> {
        let latents = inputs.require("latents")?;
        let (batch, frames) = (latents.dims()[0], latents.dims()[2]);
        let samples = frames * CONFIG.chunk_size();
        Ok(TensorMap::new().with("waveform", Tensor::zeros_f32(vec![batch, samples])))
    }

    fn inputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn outputs(&self) -> &[TensorSpec] {
        &[]
    }
}

fn model(durations: Vec<f32>) -> (DiffusionSpeechModel, Arc<CountingDenoiser>) {
    let denoiser = Arc::new(CountingDenoiser::default());
    let model = DiffusionSpeechModel::new(
        Arc::new(FixedEncoder { durations }),
        denoiser.clone(),
        Arc::new(FrameDecoder),
        CONFIG,
    )
    .unwrap();
    (model, denoiser)
}

fn text(batch: usize, len: usize) -> (Tensor, Tensor, Tensor) {
    (
        Tensor::from_i64((0..(batch * len) as i64).collect(), vec![batch, len]).unwrap(),
        Tensor::ones_i64(vec![batch, len]),
        Tensor::full_f32(0.1, vec![batch, 1, 8]),
    )
}

#[test]
fn test_denoiser_runs_exactly_n_times() {
    setup();
    for steps in 1..=6 {
        for (batch, len) in [(1, 3), (2, 7)] {
            let (model, denoiser) = model(vec![1.0; batch]);
            let (ids, mask, style) = text(batch, len);
            let mut rng = StdRng::seed_from_u64(steps as u64);

            model.generate_speech(&ids, &mask, &style, steps, 1.0, &mut rng).unwrap();

            assert_eq!(denoiser.calls.load(Ordering::SeqCst), steps);
        }
    }
}

#[test]
fn test_waveform_length_follows_predicted_duration() {
    setup();
    let (model, _) = model(vec![1.0, 0.5]);
    let (ids, mask, style) = text(2, 4);
    let mut rng = StdRng::seed_from_u64(3);

    let out = model.generate_speech(&ids, &mask, &style, 2, 1.0, &mut rng).unwrap();

    // max duration 1s * 16 Hz / chunk 4 = 4 frames
    assert_eq!(out.waveform.dims(), &[2, 16]);
    assert_eq!(out.durations.as_f32().unwrap(), &[1.0, 0.5]);
}

#[test]
fn test_doubling_speed_shortens_output() {
    setup();
    let (ids, mask, style) = text(1, 4);

    let (slow_model, _) = model(vec![2.0]);
    let slow = slow_model
        .generate_speech(&ids, &mask, &style, 1, 1.0, &mut StdRng::seed_from_u64(0))
        .unwrap();
    let (fast_model, _) = model(vec![2.0]);
    let fast = fast_model
        .generate_speech(&ids, &mask, &style, 1, 2.0, &mut StdRng::seed_from_u64(0))
        .unwrap();

    assert!(fast.waveform.dims()[1] < slow.waveform.dims()[1]);
    assert_eq!(fast.durations.as_f32().unwrap(), &[1.0]);
}

#[test]
fn test_invalid_steps_and_speed_fail_before_any_call() {
    setup();
    let (ids, mask, style) = text(1, 2);
    let (model, denoiser) = model(vec![1.0]);
    let mut rng = StdRng::seed_from_u64(0);

    let zero_steps = model.generate_speech(&ids, &mask, &style, 0, 1.0, &mut rng);
    assert!(matches!(zero_steps, Err(OnnxError::Configuration(_))));

    for speed in [0.0, -1.0, f32::NAN] {
        let result = model.generate_speech(&ids, &mask, &style, 3, speed, &mut rng);
        assert!(matches!(result, Err(OnnxError::Configuration(_))));
    }
    assert_eq!(denoiser.calls.load(Ordering::SeqCst), 0);
}

proptest! {
    #[test]
    fn prop_doubling_speed_shrinks_latent(base in 0.01f32..60.0, speed in 0.1f32..4.0) {
        let chunk = 512 * 6;
        let normal = latent_length(base / speed, 44_100, chunk);
        let doubled = latent_length(base / (2.0 * speed), 44_100, chunk);
        prop_assert!(doubled <= normal);
        if normal > 1 {
            prop_assert!(doubled < normal);
        }
    }
}
