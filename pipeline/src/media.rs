//! Decoded media values exchanged with handlers.

use serde::{Deserialize, Serialize};
use xmodal_values::Tensor;

use crate::error::{PipelineError, Result};

/// Interleaved (HWC) 8-bit image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        Self { width, height, channels, data }.validated()
    }

    /// Checks that the buffer holds `width * height * channels` bytes.
    pub fn validated(self) -> Result<Self> {
        if !(1..=4).contains(&self.channels) {
            return Err(PipelineError::InputShape(format!(
                "images must have 1 to 4 channels, got {}",
                self.channels
            )));
        }
        let expected = self.width * self.height * self.channels;
        if self.data.len() != expected {
            return Err(PipelineError::InputShape(format!(
                "{}x{}x{} image needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.channels,
                self.data.len()
            )));
        }
        Ok(self)
    }

    /// Single-channel image from a `[h, w]` (or `[1, h, w]`) float tensor in `0..=255`.
    pub fn from_mask_tensor(tensor: &Tensor) -> Result<Self> {
        let (height, width) = match tensor.dims() {
            [h, w] | [1, h, w] => (*h, *w),
            dims => {
                return Err(PipelineError::InputShape(format!("expected a [h, w] mask, got dims {dims:?}")))
            }
        };
        let data = tensor.to_f32_lossy().into_iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();
        Self::new(width, height, 1, data)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Converts grayscale, gray+alpha and RGB to RGBA.
    pub fn to_rgba(&self) -> RawImage {
        if self.channels == 4 {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.pixel_count() * 4);
        for px in self.data.chunks(self.channels) {
            let (rgb, alpha) = match px {
                [g] => ([*g, *g, *g], 255),
                [g, a] => ([*g, *g, *g], *a),
                [r, g, b] => ([*r, *g, *b], 255),
                _ => ([0, 0, 0], 255),
            };
            data.extend_from_slice(&rgb);
            data.push(alpha);
        }
        RawImage { width: self.width, height: self.height, channels: 4, data }
    }

    /// RGBA copy of this image with `mask` as its alpha channel.
    pub fn put_alpha(&self, mask: &RawImage) -> Result<RawImage> {
        if mask.channels != 1 || mask.width != self.width || mask.height != self.height {
            return Err(PipelineError::Processor(format!(
                "alpha mask {}x{}x{} does not match image {}x{}",
                mask.width, mask.height, mask.channels, self.width, self.height
            )));
        }
        let mut rgba = self.to_rgba();
        for (px, &alpha) in rgba.data.chunks_mut(4).zip(&mask.data) {
            px[3] = alpha;
        }
        Ok(rgba)
    }
}

/// Mono PCM samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAudio {
    pub audio: Vec<f32>,
    pub sampling_rate: u32,
}

impl RawAudio {
    pub fn new(audio: Vec<f32>, sampling_rate: u32) -> Self {
        Self { audio, sampling_rate }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sampling_rate == 0 {
            return 0.0;
        }
        self.audio.len() as f32 / self.sampling_rate as f32
    }
}
