//! ONNX Runtime model invocation and the iterative execution loops
//!
//! - [`InferenceSession`]: named tensors in, named tensors out; [`OnnxSession`]
//!   is the `ort`-backed implementation
//! - [`CausalLanguageModel`] and [`Generator`]: autoregressive decoding with
//!   an explicit decode cache (greedy, sampling, beam search)
//! - [`DiffusionSpeechModel`]: text encoder, fixed-step latent denoising and
//!   voice decoding

pub mod causal_lm;
pub mod convert;
pub mod denoising;
pub mod error;
pub mod generation;
pub mod sampling;
pub mod session;

pub use causal_lm::{position_ids, CausalLanguageModel, CausalLmOutput, DecoderCache, OnnxCausalLm};
pub use denoising::{
    latent_length, run_denoising, DiffusionSpeechModel, LatentState, SpeechModelConfig, SpeechOutput,
};
pub use error::{OnnxError, Result};
pub use generation::{generate, GenerationConfig, GenerationOutput, Generator};
pub use sampling::{BeamSearchParams, DecodingStrategy, SamplingParams};
pub use session::{InferenceSession, OnnxSession, TensorSpec};

/// Re-export of `ort` for callers that need the raw runtime.
pub use ort;
