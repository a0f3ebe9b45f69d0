//! Numeric helpers shared by the post-processing stages.

use crate::error::{ValueError, ValueResult};
use crate::tensor::Tensor;

/// Numerically stable softmax: subtracts the maximum before exponentiating.
///
/// A row where every entry is `-inf` has no valid choice and yields all zeros.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; values.len()];
    }
    let exps: Vec<f32> = values.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// `ln(softmax(values))` computed without the intermediate exponentials overflowing.
pub fn log_softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![f32::NEG_INFINITY; values.len()];
    }
    let log_sum = values.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
    values.iter().map(|&v| v - max - log_sum).collect()
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn sigmoid_all(values: &[f32]) -> Vec<f32> {
    values.iter().map(|&v| sigmoid(v)).collect()
}

/// Index of the largest value. The first occurrence wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// The `k` highest `(index, value)` pairs in descending order of value.
///
/// `k` is clamped to the number of values and `None` returns everything.
/// The sort is stable, so equal values keep ascending index order.
pub fn top_k(values: &[f32], k: Option<usize>) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    let k = k.unwrap_or(indexed.len()).min(indexed.len());
    indexed.truncate(k);
    indexed
}

/// Scales `values` in place to unit L2 norm. A zero vector is left unchanged.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

fn last_axis_width(tensor: &Tensor) -> ValueResult<usize> {
    match tensor.dims().last() {
        Some(&w) if w > 0 => Ok(w),
        _ => Err(ValueError::invalid(format!(
            "expected a non-empty last axis, got dims {:?}",
            tensor.dims()
        ))),
    }
}

/// Row-wise softmax over the last axis of a float tensor.
pub fn softmax_last_axis(tensor: &Tensor) -> ValueResult<Tensor> {
    let width = last_axis_width(tensor)?;
    let data: Vec<f32> = tensor.as_f32()?.chunks(width).flat_map(softmax).collect();
    Tensor::from_f32(data, tensor.dims().to_vec())
}

/// Row-wise L2 normalization over the last axis of a float tensor.
pub fn l2_normalize_last_axis(tensor: &Tensor) -> ValueResult<Tensor> {
    let width = last_axis_width(tensor)?;
    let mut data = tensor.as_f32()?.to_vec();
    data.chunks_mut(width).for_each(l2_normalize);
    Tensor::from_f32(data, tensor.dims().to_vec())
}
