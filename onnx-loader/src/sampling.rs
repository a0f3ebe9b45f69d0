//! Logits processors and token selection for the generation loop.

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::RngCore;
use xmodal_values::math::{argmax, softmax, top_k};

use crate::error::{OnnxError, Result};

/// Temperature and nucleus/top-k filtering used by [`DecodingStrategy::Sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { temperature: 1.0, top_k: None, top_p: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchParams {
    pub num_beams: usize,
    pub length_penalty: f32,
    pub early_stopping: bool,
}

impl Default for BeamSearchParams {
    fn default() -> Self {
        Self { num_beams: 4, length_penalty: 1.0, early_stopping: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodingStrategy {
    Greedy,
    Sample(SamplingParams),
    BeamSearch(BeamSearchParams),
}

impl Default for DecodingStrategy {
    fn default() -> Self {
        Self::Greedy
    }
}

/// Penalize tokens already present in `history`: positive logits are divided
/// by `penalty`, negative ones multiplied.
pub fn apply_repetition_penalty(logits: &mut [f32], history: &[i64], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let mut seen = vec![false; logits.len()];
    for &id in history {
        let Ok(idx) = usize::try_from(id) else { continue };
        if idx >= logits.len() || seen[idx] {
            continue;
        }
        seen[idx] = true;
        let l = logits[idx];
        logits[idx] = if l > 0.0 { l / penalty } else { l * penalty };
    }
}

pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    if temperature != 1.0 {
        logits.iter_mut().for_each(|l| *l /= temperature);
    }
}

/// Keep the `k` largest logits, setting the rest to negative infinity.
/// Ties are kept in index order.
pub fn top_k_filter(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut keep = vec![false; logits.len()];
    for (idx, _) in top_k(logits, Some(k)) {
        keep[idx] = true;
    }
    for (l, kept) in logits.iter_mut().zip(keep) {
        if !kept {
            *l = f32::NEG_INFINITY;
        }
    }
}

/// Keep the smallest set of most probable tokens whose cumulative
/// probability reaches `p`. The most probable token always survives.
pub fn top_p_filter(logits: &mut [f32], p: f32) {
    if p >= 1.0 || logits.is_empty() {
        return;
    }
    let probs = softmax(logits);
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]).then(a.cmp(&b)));

    let mut cumulative = 0.0f32;
    let mut cutoff = order.len();
    for (rank, &idx) in order.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative >= p {
            cutoff = rank + 1;
            break;
        }
    }
    for &idx in &order[cutoff..] {
        logits[idx] = f32::NEG_INFINITY;
    }
}

pub fn greedy(logits: &[f32]) -> Result<usize> {
    argmax(logits).ok_or_else(|| OnnxError::InferenceFailed("empty logits row".to_string()))
}

/// Draw one token from the filtered distribution.
pub fn sample(logits: &[f32], params: &SamplingParams, rng: &mut dyn RngCore) -> Result<usize> {
    let mut scores = logits.to_vec();
    apply_temperature(&mut scores, params.temperature);
    if let Some(k) = params.top_k {
        top_k_filter(&mut scores, k);
    }
    if let Some(p) = params.top_p {
        top_p_filter(&mut scores, p);
    }
    let probs = softmax(&scores);
    let dist = WeightedIndex::new(&probs)
        .map_err(|e| OnnxError::InferenceFailed(format!("cannot sample from logits: {e}")))?;
    Ok(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_repetition_penalty_signs() {
        let mut logits = vec![2.0, -2.0, 1.0];
        apply_repetition_penalty(&mut logits, &[0, 1, 1], 2.0);
        assert_eq!(logits, vec![1.0, -4.0, 1.0]);
    }

    #[test]
    fn test_top_k_filter_keeps_k() {
        let mut logits = vec![0.1, 3.0, 2.0, -1.0];
        top_k_filter(&mut logits, 2);
        assert_eq!(logits.iter().filter(|l| l.is_finite()).count(), 2);
        assert!(logits[1].is_finite() && logits[2].is_finite());
    }

    #[test]
    fn test_top_p_filter_keeps_best_token() {
        let mut logits = vec![10.0, 0.0, 0.0];
        top_p_filter(&mut logits, 0.5);
        assert!(logits[0].is_finite());
        assert!(logits[1].is_infinite() && logits[2].is_infinite());
    }

    #[test]
    fn test_sample_is_deterministic_per_seed() {
        let logits = vec![1.0, 1.2, 0.8, 1.1];
        let params = SamplingParams::default();
        let a: Vec<usize> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..16).map(|_| sample(&logits, &params, &mut rng).unwrap()).collect()
        };
        let b: Vec<usize> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..16).map(|_| sample(&logits, &params, &mut rng).unwrap()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_with_top_k_one_is_greedy() {
        let logits = vec![0.3, 2.5, 1.0];
        let params = SamplingParams { temperature: 0.7, top_k: Some(1), top_p: None };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..8 {
            assert_eq!(sample(&logits, &params, &mut rng).unwrap(), 1);
        }
    }
}
