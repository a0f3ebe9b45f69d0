//! Seams for image/audio preprocessing and resource fetching.
//!
//! Decoding, resizing and feature extraction live outside this crate; the
//! handlers only see these traits.

use std::sync::Arc;

use xmodal_values::TensorMap;

use crate::error::{PipelineError, Result};
use crate::input::{AudioInput, ImageInput};
use crate::media::RawImage;

/// Turns decoded images into model inputs (`pixel_values`, ...).
pub trait ImageProcessor: Send + Sync {
    fn process(&self, images: &[RawImage]) -> Result<TensorMap>;
}

/// Turns one waveform into model inputs (`input_values` or `input_features`).
pub trait AudioProcessor: Send + Sync {
    fn sampling_rate(&self) -> u32;

    fn process(&self, audio: &[f32]) -> Result<TensorMap>;
}

/// Fetches and decodes resources referenced by URL or path.
pub trait ResourceLoader: Send + Sync {
    fn load_image(&self, url: &str) -> Result<RawImage>;

    /// Decoded mono samples resampled to `sampling_rate`.
    fn load_audio(&self, url: &str, sampling_rate: u32) -> Result<Vec<f32>>;

    fn load_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

fn no_loader(url: &str) -> PipelineError {
    PipelineError::Processor(format!("cannot fetch '{url}': no resource loader configured"))
}

pub(crate) fn resolve_image(input: ImageInput, loader: Option<&Arc<dyn ResourceLoader>>) -> Result<RawImage> {
    match input {
        ImageInput::Raw(image) => Ok(image),
        ImageInput::Url(url) => loader.ok_or_else(|| no_loader(&url))?.load_image(&url),
    }
}

pub(crate) fn resolve_audio(
    input: AudioInput,
    loader: Option<&Arc<dyn ResourceLoader>>,
    sampling_rate: u32,
) -> Result<Vec<f32>> {
    match input {
        AudioInput::Samples(samples) => Ok(samples),
        AudioInput::Raw(raw) if raw.sampling_rate == sampling_rate => Ok(raw.audio),
        AudioInput::Raw(raw) => Err(PipelineError::Processor(format!(
            "audio sampled at {} Hz, processor expects {sampling_rate} Hz",
            raw.sampling_rate
        ))),
        AudioInput::Url(url) => loader.ok_or_else(|| no_loader(&url))?.load_audio(&url, sampling_rate),
    }
}

/// Little-endian `f32` buffer, the on-disk format of speaker embeddings.
pub(crate) fn f32_from_le_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(PipelineError::Processor(format!(
            "embedding file has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::RawAudio;

    #[test]
    fn test_url_without_loader_fails() {
        let err = resolve_image(ImageInput::Url("cat.png".into()), None).unwrap_err();
        assert!(matches!(err, PipelineError::Processor(_)));
    }

    #[test]
    fn test_audio_rate_mismatch() {
        let raw = AudioInput::Raw(RawAudio::new(vec![0.0; 4], 8000));
        assert!(resolve_audio(raw, None, 16000).is_err());
        let raw = AudioInput::Raw(RawAudio::new(vec![0.0; 4], 16000));
        assert_eq!(resolve_audio(raw, None, 16000).unwrap().len(), 4);
    }

    #[test]
    fn test_f32_le_bytes() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(f32_from_le_bytes(&bytes).unwrap(), vec![1.5, -2.0]);
        assert!(f32_from_le_bytes(&bytes[..5]).is_err());
    }
}
