//! Numeric post-processing shared by the task handlers.
//!
//! Raw model outputs come in as flat `f32` rows; these helpers turn them into
//! ranked labels, answer spans, boxes and pooled or quantized embeddings.

use serde::{Deserialize, Serialize};
use xmodal_values::math::{argmax, sigmoid_all, softmax, top_k};
use xmodal_values::{Tensor, TensorData};

use crate::error::{PipelineError, Result};
use crate::model_config::ModelConfig;

/// One ranked class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Softmax (or per-class sigmoid for multi-label heads), then the `k` best labels.
pub fn classify(logits: &[f32], config: &ModelConfig, k: Option<usize>, multi_label: bool) -> Vec<LabelScore> {
    let scores = if multi_label { sigmoid_all(logits) } else { softmax(logits) };
    top_k(&scores, k)
        .into_iter()
        .map(|(index, score)| LabelScore { label: config.label(index), score })
        .collect()
}

/// Candidate answer span, token positions inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QaSpan {
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Positions an answer may start or end at: attended tokens after the first
/// separator that are not special tokens. Position 0 stays open so the
/// softmax always has a finite entry.
pub fn context_mask(ids: &[i64], attention: &[i64], sep_index: usize, special_ids: &[i64]) -> Vec<bool> {
    ids.iter()
        .zip(attention)
        .enumerate()
        .map(|(i, (id, &mask))| {
            mask == 1 && (i == 0 || (i > sep_index && !special_ids.contains(id)))
        })
        .collect()
}

/// Best `k` spans by `p_start * p_end` over pairs with `start <= end`.
///
/// Logits outside `valid` are forced to `-inf` before the softmax and the
/// probability at position 0 is zeroed afterwards.
pub fn score_spans(start_logits: &[f32], end_logits: &[f32], valid: &[bool], k: usize) -> Vec<QaSpan> {
    let masked = |logits: &[f32]| -> Vec<f32> {
        let row: Vec<f32> = logits
            .iter()
            .zip(valid)
            .map(|(&l, &ok)| if ok { l } else { f32::NEG_INFINITY })
            .collect();
        let mut probs = softmax(&row);
        if let Some(first) = probs.first_mut() {
            *first = 0.0;
        }
        probs
    };
    let start = masked(start_logits);
    let end = masked(end_logits);

    let mut spans = Vec::with_capacity(start.len() * (start.len() + 1) / 2);
    for (s, &ps) in start.iter().enumerate() {
        for (e, &pe) in end.iter().enumerate().skip(s) {
            spans.push(QaSpan { start: s, end: e, score: ps * pe });
        }
    }
    spans.sort_by(|a, b| b.score.total_cmp(&a.score));
    spans.truncate(k);
    spans
}

/// Box corners, either pixels or fractions of the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundingBox {
    Pixels { xmin: i64, ymin: i64, xmax: i64, ymax: i64 },
    Fraction { xmin: f32, ymin: f32, xmax: f32, ymax: f32 },
}

/// `[cx, cy, w, h]` to `[xmin, ymin, xmax, ymax]`.
pub fn center_to_corners(b: [f32; 4]) -> [f32; 4] {
    let [cx, cy, w, h] = b;
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Normalized corners scaled to a `(height, width)` image, clamped and rounded.
pub fn to_pixel_box(corners: [f32; 4], size: (usize, usize)) -> BoundingBox {
    let (height, width) = (size.0 as f32, size.1 as f32);
    let px = |v: f32, limit: f32| (v * limit).clamp(0.0, limit).round() as i64;
    BoundingBox::Pixels {
        xmin: px(corners[0], width),
        ymin: px(corners[1], height),
        xmax: px(corners[2], width),
        ymax: px(corners[3], height),
    }
}

pub fn to_fraction_box(corners: [f32; 4]) -> BoundingBox {
    BoundingBox::Fraction { xmin: corners[0], ymin: corners[1], xmax: corners[2], ymax: corners[3] }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub score: f32,
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// DETR-style decoding for one image.
///
/// `logits` is `[queries, classes]` with the last class meaning "no object",
/// `boxes` is `[queries, 4]` in normalized center format. `pixel_size` is
/// `(height, width)` for pixel boxes, `None` for fractions.
pub fn post_process_object_detection(
    logits: &Tensor,
    boxes: &Tensor,
    threshold: f32,
    pixel_size: Option<(usize, usize)>,
    config: &ModelConfig,
) -> Result<Vec<DetectionResult>> {
    let (queries, classes) = match logits.dims() {
        [q, c] => (*q, *c),
        dims => return Err(PipelineError::InputShape(format!("detection logits must be 2-D, got {dims:?}"))),
    };
    if boxes.dims() != [queries, 4] {
        return Err(PipelineError::InputShape(format!(
            "expected pred_boxes [{queries}, 4], got {:?}",
            boxes.dims()
        )));
    }
    let logits = logits.as_f32()?;
    let boxes = boxes.as_f32()?;

    let mut results = Vec::new();
    for q in 0..queries {
        let row = &logits[q * classes..(q + 1) * classes];
        let Some(best) = argmax(row) else { continue };
        if best == classes - 1 {
            continue;
        }
        let score = softmax(row)[best];
        if score <= threshold {
            continue;
        }
        let b = &boxes[q * 4..q * 4 + 4];
        let corners = center_to_corners([b[0], b[1], b[2], b[3]]);
        let bbox = match pixel_size {
            Some(size) => to_pixel_box(corners, size),
            None => to_fraction_box(corners),
        };
        results.push(DetectionResult { score, label: config.label(best), bbox });
    }
    Ok(results)
}

/// Attention-mask weighted mean over the sequence axis: `[b, s, d]` to `[b, d]`.
pub fn mean_pooling(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq, dim) = match hidden.dims() {
        [b, s, d] => (*b, *s, *d),
        dims => return Err(PipelineError::InputShape(format!("mean pooling needs [b, s, d], got {dims:?}"))),
    };
    if attention_mask.dims() != [batch, seq] {
        return Err(PipelineError::InputShape(format!(
            "attention mask {:?} does not match hidden states {:?}",
            attention_mask.dims(),
            hidden.dims()
        )));
    }
    let values = hidden.as_f32()?;
    let mask = attention_mask.to_f32_lossy();

    let mut pooled = vec![0.0f32; batch * dim];
    for b in 0..batch {
        let out = &mut pooled[b * dim..(b + 1) * dim];
        let mut count = 0.0f32;
        for s in 0..seq {
            let m = mask[b * seq + s];
            if m == 0.0 {
                continue;
            }
            count += m;
            let token = &values[(b * seq + s) * dim..(b * seq + s + 1) * dim];
            out.iter_mut().zip(token).for_each(|(o, v)| *o += v * m);
        }
        if count > 0.0 {
            out.iter_mut().for_each(|o| *o /= count);
        }
    }
    Ok(Tensor::from_f32(pooled, vec![batch, dim])?)
}

/// Sign-bit packing of embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// int8, packed byte minus 128
    Binary,
    /// uint8
    Ubinary,
}

impl std::str::FromStr for Precision {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(Self::Binary),
            "ubinary" => Ok(Self::Ubinary),
            other => Err(PipelineError::Configuration(format!(
                "precision must be 'binary' or 'ubinary', got '{other}'"
            ))),
        }
    }
}

/// Packs `x > 0` bits MSB-first, eight dimensions per byte: `[b, d]` to `[b, d / 8]`.
pub fn quantize_embeddings(embeddings: &Tensor, precision: Precision) -> Result<Tensor> {
    let (batch, dim) = match embeddings.dims() {
        [b, d] => (*b, *d),
        dims => {
            return Err(PipelineError::Configuration(format!(
                "quantization needs a 2-D tensor, got dims {dims:?}"
            )))
        }
    };
    if dim % 8 != 0 {
        return Err(PipelineError::Configuration(format!(
            "quantization needs the last dimension divisible by 8, got {dim}"
        )));
    }
    let packed: Vec<u8> = embeddings
        .as_f32()?
        .chunks(8)
        .map(|bits| bits.iter().fold(0u8, |acc, &x| (acc << 1) | u8::from(x > 0.0)))
        .collect();
    let dims = vec![batch, dim / 8];
    let data = match precision {
        Precision::Ubinary => TensorData::U8(packed),
        Precision::Binary => TensorData::I8(packed.into_iter().map(|p| (i16::from(p) - 128) as i8).collect()),
    };
    Ok(Tensor::new(data, dims)?)
}

/// Bilinear resize of a `[in_h, in_w]` plane (half-pixel centers, no corner alignment).
pub fn interpolate_bilinear(plane: &[f32], input: (usize, usize), output: (usize, usize)) -> Result<Vec<f32>> {
    let (in_h, in_w) = input;
    let (out_h, out_w) = output;
    if plane.len() != in_h * in_w || in_h == 0 || in_w == 0 {
        return Err(PipelineError::InputShape(format!(
            "cannot interpolate {} values as a {in_h}x{in_w} plane",
            plane.len()
        )));
    }
    let source = |o: usize, out: usize, len: usize| -> (usize, usize, f32) {
        let scale = len as f32 / out as f32;
        let pos = ((o as f32 + 0.5) * scale - 0.5).clamp(0.0, (len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(len - 1);
        (lo, hi, pos - lo as f32)
    };

    let mut result = Vec::with_capacity(out_h * out_w);
    for y in 0..out_h {
        let (y0, y1, fy) = source(y, out_h, in_h);
        for x in 0..out_w {
            let (x0, x1, fx) = source(x, out_w, in_w);
            let top = plane[y0 * in_w + x0] * (1.0 - fx) + plane[y0 * in_w + x1] * fx;
            let bottom = plane[y1 * in_w + x0] * (1.0 - fx) + plane[y1 * in_w + x1] * fx;
            result.push(top * (1.0 - fy) + bottom * fy);
        }
    }
    Ok(result)
}

/// Stretches values to `0..=255`. A constant plane maps to zeros.
pub fn min_max_to_u8(values: &[f32]) -> Vec<u8> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; values.len()];
    }
    values.iter().map(|v| ((v - min) / range * 255.0) as u8).collect()
}
