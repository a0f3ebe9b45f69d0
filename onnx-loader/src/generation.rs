//! Autoregressive generation loop: greedy, sampling and beam search over a
//! [`CausalLanguageModel`].

use rand::RngCore;
use xmodal_common::InferenceSettings;
use xmodal_values::math::{log_softmax, top_k};
use xmodal_values::Tensor;

use crate::causal_lm::CausalLanguageModel;
use crate::error::{OnnxError, Result};
use crate::sampling::{self, BeamSearchParams, DecodingStrategy, SamplingParams};

/// Termination and decoding policy for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: Option<usize>,
    pub eos_token_ids: Vec<i64>,
    /// Token fed to rows that already finished. Defaults to the first eos id.
    pub pad_token_id: Option<i64>,
    pub strategy: DecodingStrategy,
    pub num_return_sequences: usize,
    pub repetition_penalty: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: Some(20),
            eos_token_ids: Vec::new(),
            pad_token_id: None,
            strategy: DecodingStrategy::Greedy,
            num_return_sequences: 1,
            repetition_penalty: 1.0,
        }
    }
}

impl GenerationConfig {
    /// Maps workspace generation settings onto a decoding strategy.
    ///
    /// `num_beams > 1` selects beam search, otherwise `do_sample` selects
    /// sampling. `top_k = 0` and `top_p >= 1` disable those filters.
    pub fn from_settings(settings: &InferenceSettings) -> Self {
        let strategy = if settings.num_beams > 1 {
            DecodingStrategy::BeamSearch(BeamSearchParams {
                num_beams: settings.num_beams as usize,
                length_penalty: settings.length_penalty,
                early_stopping: settings.early_stopping,
            })
        } else if settings.do_sample {
            DecodingStrategy::Sample(SamplingParams {
                temperature: settings.temperature,
                top_k: (settings.top_k > 0).then_some(settings.top_k as usize),
                top_p: (settings.top_p < 1.0).then_some(settings.top_p),
            })
        } else {
            DecodingStrategy::Greedy
        };
        Self {
            max_new_tokens: Some(settings.max_new_tokens as usize),
            strategy,
            num_return_sequences: settings.num_return_sequences.max(1) as usize,
            repetition_penalty: settings.repetition_penalty,
            ..Self::default()
        }
    }

    pub fn with_eos_token_ids(mut self, ids: Vec<i64>) -> Self {
        self.eos_token_ids = ids;
        self
    }

    pub fn with_pad_token_id(mut self, id: Option<i64>) -> Self {
        self.pad_token_id = id;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: Option<usize>) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_strategy(mut self, strategy: DecodingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_num_return_sequences(mut self, n: usize) -> Self {
        self.num_return_sequences = n;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.eos_token_ids.is_empty() {
            return Err(OnnxError::configuration(
                "generation needs an end-of-sequence token id to terminate",
            ));
        }
        if self.num_return_sequences == 0 {
            return Err(OnnxError::configuration("num_return_sequences must be at least 1"));
        }
        if self.repetition_penalty.is_nan() || self.repetition_penalty <= 0.0 {
            return Err(OnnxError::configuration("repetition_penalty must be positive"));
        }
        match &self.strategy {
            DecodingStrategy::Greedy if self.num_return_sequences != 1 => Err(OnnxError::configuration(
                "greedy decoding returns exactly one sequence per input",
            )),
            DecodingStrategy::Sample(p) => {
                if p.temperature.is_nan() || p.temperature <= 0.0 {
                    return Err(OnnxError::configuration("temperature must be positive"));
                }
                if let Some(top_p) = p.top_p {
                    if top_p.is_nan() || top_p <= 0.0 || top_p > 1.0 {
                        return Err(OnnxError::configuration("top_p must be in (0, 1]"));
                    }
                }
                Ok(())
            }
            DecodingStrategy::BeamSearch(b) => {
                if b.num_beams == 0 {
                    return Err(OnnxError::configuration("num_beams must be at least 1"));
                }
                if self.num_return_sequences > b.num_beams {
                    return Err(OnnxError::configuration(format!(
                        "num_return_sequences ({}) cannot exceed num_beams ({})",
                        self.num_return_sequences, b.num_beams
                    )));
                }
                Ok(())
            }
            DecodingStrategy::Greedy => Ok(()),
        }
    }

    fn pad_id(&self) -> i64 {
        self.pad_token_id.or_else(|| self.eos_token_ids.first().copied()).unwrap_or(0)
    }

    fn is_eos(&self, token: i64) -> bool {
        self.eos_token_ids.contains(&token)
    }

    fn budget_left(&self, step: usize) -> bool {
        self.max_new_tokens.map_or(true, |max| step < max)
    }
}

/// Generated sequences, element-major: the `num_return_sequences` outputs
/// of prompt 0 come first. Each sequence is the prompt row followed by the
/// generated tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub sequences: Vec<Vec<i64>>,
    pub num_return_sequences: usize,
}

impl GenerationOutput {
    /// Sequences belonging to prompt `index`.
    pub fn for_prompt(&self, index: usize) -> &[Vec<i64>] {
        let n = self.num_return_sequences;
        let start = (index * n).min(self.sequences.len());
        let end = (start + n).min(self.sequences.len());
        &self.sequences[start..end]
    }
}

/// A validated generation loop bound to a model.
pub struct Generator<'m, M: CausalLanguageModel> {
    model: &'m M,
    config: GenerationConfig,
}

/// Rectangular token state shared by all strategies. Rows are never
/// removed; finished rows keep their index.
struct DecodeState {
    prompts: Vec<Vec<i64>>,
    masks: Vec<Vec<i64>>,
    generated: Vec<Vec<i64>>,
    finished: Vec<bool>,
}

impl DecodeState {
    fn new(prompts: Vec<Vec<i64>>, masks: Vec<Vec<i64>>) -> Self {
        let rows = prompts.len();
        Self { prompts, masks, generated: vec![Vec::new(); rows], finished: vec![false; rows] }
    }

    fn rows(&self) -> usize {
        self.prompts.len()
    }

    fn mask_tensor(&self) -> Result<Tensor> {
        let width = self.masks.first().map_or(0, Vec::len);
        let flat: Vec<i64> = self.masks.iter().flatten().copied().collect();
        Ok(Tensor::from_i64(flat, vec![self.rows(), width])?)
    }

    fn history(&self, row: usize) -> Vec<i64> {
        let mut h = self.prompts[row].clone();
        h.extend_from_slice(&self.generated[row]);
        h
    }

    /// Extend every mask row by one attended position.
    fn extend_masks(&mut self) {
        self.masks.iter_mut().for_each(|m| m.push(1));
    }

    fn all_finished(&self) -> bool {
        self.finished.iter().all(|&f| f)
    }
}

fn split_rows(tensor: &Tensor, name: &str) -> Result<Vec<Vec<i64>>> {
    let dims = tensor.dims();
    if dims.len() != 2 || dims[0] == 0 {
        return Err(OnnxError::InferenceFailed(format!(
            "{name} must be a non-empty [batch, seq] tensor, got {:?}",
            dims
        )));
    }
    let width = dims[1];
    let flat = tensor.to_i64_lossy();
    Ok(flat.chunks(width.max(1)).take(dims[0]).map(<[i64]>::to_vec).collect())
}

fn column(tokens: &[i64]) -> Result<Tensor> {
    Ok(Tensor::from_i64(tokens.to_vec(), vec![tokens.len(), 1])?)
}

fn logits_rows(logits: &Tensor, rows: usize) -> Result<Vec<Vec<f32>>> {
    let dims = logits.dims();
    if dims.len() != 2 || dims[0] != rows {
        return Err(OnnxError::InferenceFailed(format!(
            "expected [{rows}, vocab] logits, got {:?}",
            dims
        )));
    }
    let flat = logits.to_f32_lossy();
    Ok(flat.chunks(dims[1].max(1)).map(<[f32]>::to_vec).collect())
}

fn repeat_rows(rows: Vec<Vec<i64>>, times: usize) -> Vec<Vec<i64>> {
    rows.into_iter().flat_map(|r| std::iter::repeat(r).take(times)).collect()
}

impl<'m, M: CausalLanguageModel> Generator<'m, M> {
    /// Rejects configurations that could not terminate or are inconsistent,
    /// before any model call.
    pub fn new(model: &'m M, config: GenerationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn generate(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        rng: &mut dyn RngCore,
    ) -> Result<GenerationOutput> {
        let prompts = split_rows(input_ids, "input_ids")?;
        let masks = split_rows(attention_mask, "attention_mask")?;
        if prompts.len() != masks.len() || prompts[0].len() != masks[0].len() {
            return Err(OnnxError::InferenceFailed(format!(
                "input_ids {:?} and attention_mask {:?} disagree",
                input_ids.dims(),
                attention_mask.dims()
            )));
        }
        log::info!(
            "Generating for {} prompt(s) of length {} ({:?})",
            prompts.len(),
            prompts[0].len(),
            self.config.max_new_tokens
        );

        let output = match &self.config.strategy {
            DecodingStrategy::Greedy => self.run_token_loop(prompts, masks, None, rng)?,
            DecodingStrategy::Sample(params) => self.run_token_loop(prompts, masks, Some(params), rng)?,
            DecodingStrategy::BeamSearch(params) => self.run_beam_search(prompts, masks, params)?,
        };
        log::info!("Generation finished: {} sequence(s)", output.sequences.len());
        Ok(output)
    }

    /// Greedy (`params = None`) and sampling share one loop.
    fn run_token_loop(
        &self,
        prompts: Vec<Vec<i64>>,
        masks: Vec<Vec<i64>>,
        params: Option<&SamplingParams>,
        rng: &mut dyn RngCore,
    ) -> Result<GenerationOutput> {
        let n = self.config.num_return_sequences;
        let mut state = DecodeState::new(repeat_rows(prompts, n), repeat_rows(masks, n));
        let pad = self.config.pad_id();

        let width = state.prompts[0].len();
        let flat: Vec<i64> = state.prompts.iter().flatten().copied().collect();
        let mut step_input = Tensor::from_i64(flat, vec![state.rows(), width])?;
        let mut cache = None;
        let mut step = 0;

        while self.config.budget_left(step) && !state.all_finished() {
            let out = self.model.forward(&step_input, &state.mask_tensor()?, cache.take())?;
            cache = Some(out.cache);

            let rows = logits_rows(&out.logits, state.rows())?;
            let mut chosen = Vec::with_capacity(rows.len());
            for (row, mut logits) in rows.into_iter().enumerate() {
                if state.finished[row] {
                    chosen.push(pad);
                    continue;
                }
                sampling::apply_repetition_penalty(&mut logits, &state.history(row), self.config.repetition_penalty);
                let index = match params {
                    Some(p) => sampling::sample(&logits, p, rng)?,
                    None => sampling::greedy(&logits)?,
                };
                let token = index as i64;
                state.generated[row].push(token);
                if self.config.is_eos(token) {
                    state.finished[row] = true;
                }
                chosen.push(token);
            }

            state.extend_masks();
            step_input = column(&chosen)?;
            step += 1;
            log::debug!("Generation step {} done", step);
        }

        let sequences = (0..state.rows()).map(|row| state.history(row)).collect();
        Ok(GenerationOutput { sequences, num_return_sequences: n })
    }

    fn run_beam_search(
        &self,
        prompts: Vec<Vec<i64>>,
        masks: Vec<Vec<i64>>,
        params: &BeamSearchParams,
    ) -> Result<GenerationOutput> {
        let k = params.num_beams;
        let elements = prompts.len();
        let mut state = DecodeState::new(repeat_rows(prompts, k), repeat_rows(masks, k));
        let pad = self.config.pad_id();

        let mut beam_scores: Vec<f32> = (0..state.rows())
            .map(|row| if row % k == 0 { 0.0 } else { f32::NEG_INFINITY })
            .collect();
        let mut hyps: Vec<BeamHypotheses> = (0..elements).map(|_| BeamHypotheses::new(params)).collect();
        let mut done = vec![false; elements];

        let width = state.prompts[0].len();
        let flat: Vec<i64> = state.prompts.iter().flatten().copied().collect();
        let mut step_input = Tensor::from_i64(flat, vec![state.rows(), width])?;
        let mut cache = None;
        let mut step = 0;

        while self.config.budget_left(step) && !done.iter().all(|&d| d) {
            let out = self.model.forward(&step_input, &state.mask_tensor()?, cache.take())?;
            let rows = logits_rows(&out.logits, state.rows())?;

            let mut sources = Vec::with_capacity(state.rows());
            let mut tokens = Vec::with_capacity(state.rows());
            let mut scores = Vec::with_capacity(state.rows());

            for e in 0..elements {
                if done[e] {
                    for b in 0..k {
                        sources.push(e * k + b);
                        tokens.push(pad);
                        scores.push(0.0);
                    }
                    continue;
                }

                let mut candidates: Vec<(f32, usize, i64)> = Vec::with_capacity(2 * k * k);
                for b in 0..k {
                    let row = e * k + b;
                    let mut logits = rows[row].clone();
                    sampling::apply_repetition_penalty(&mut logits, &state.history(row), self.config.repetition_penalty);
                    let logp = log_softmax(&logits);
                    for (token, lp) in top_k(&logp, Some(2 * k)) {
                        candidates.push((beam_scores[row] + lp, row, token as i64));
                    }
                }
                candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
                candidates.truncate(2 * k);

                let mut next = Vec::with_capacity(k);
                for (rank, &(score, row, token)) in candidates.iter().enumerate() {
                    if self.config.is_eos(token) {
                        if rank < k && score.is_finite() {
                            let mut seq = state.generated[row].clone();
                            seq.push(token);
                            hyps[e].add(seq, score, step + 1);
                        }
                        continue;
                    }
                    next.push((score, row, token));
                    if next.len() == k {
                        break;
                    }
                }
                // Tiny vocabularies can leave fewer than k live candidates.
                while next.len() < k {
                    next.push((f32::NEG_INFINITY, e * k, pad));
                }

                let best_running = next[0].0;
                if hyps[e].is_done(best_running, step + 1) {
                    done[e] = true;
                    log::debug!("Beam search element {} done at step {}", e, step + 1);
                }
                for (score, row, token) in next {
                    sources.push(row);
                    tokens.push(token);
                    scores.push(score);
                }
            }

            let previous = std::mem::take(&mut state.generated);
            state.generated = sources
                .iter()
                .zip(&tokens)
                .enumerate()
                .map(|(row, (&src, &token))| {
                    let mut seq = previous[src].clone();
                    if !done[row / k] {
                        seq.push(token);
                    }
                    seq
                })
                .collect();
            state.masks = sources.iter().map(|&src| state.masks[src].clone()).collect();
            beam_scores = scores;

            cache = Some(self.model.reorder_cache(out.cache, &sources)?);
            state.extend_masks();
            step_input = column(&tokens)?;
            step += 1;
        }

        for e in 0..elements {
            if done[e] {
                continue;
            }
            for b in 0..k {
                let row = e * k + b;
                if beam_scores[row].is_finite() {
                    let len = state.generated[row].len();
                    hyps[e].add(state.generated[row].clone(), beam_scores[row], len);
                }
            }
        }

        let n = self.config.num_return_sequences;
        let mut sequences = Vec::with_capacity(elements * n);
        for (e, h) in hyps.into_iter().enumerate() {
            let prompt = &state.prompts[e * k];
            let mut best = h.into_sorted();
            best.truncate(n);
            if best.len() < n {
                return Err(OnnxError::InferenceFailed(format!(
                    "beam search kept {} hypotheses for prompt {e}, {n} requested",
                    best.len()
                )));
            }
            for (_, tokens) in best {
                let mut seq = prompt.clone();
                seq.extend(tokens);
                sequences.push(seq);
            }
        }
        Ok(GenerationOutput { sequences, num_return_sequences: n })
    }
}

/// Finished hypotheses of one prompt, capped at `num_beams`.
struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    beams: Vec<(f32, Vec<i64>)>,
}

impl BeamHypotheses {
    fn new(params: &BeamSearchParams) -> Self {
        Self {
            num_beams: params.num_beams,
            length_penalty: params.length_penalty,
            early_stopping: params.early_stopping,
            beams: Vec::new(),
        }
    }

    fn normalized(&self, sum_logprobs: f32, generated_len: usize) -> f32 {
        sum_logprobs / (generated_len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f32 {
        self.beams.iter().map(|(s, _)| *s).fold(f32::INFINITY, f32::min)
    }

    fn add(&mut self, tokens: Vec<i64>, sum_logprobs: f32, generated_len: usize) {
        let score = self.normalized(sum_logprobs, generated_len);
        if self.beams.len() < self.num_beams || score > self.worst_score() {
            self.beams.push((score, tokens));
            if self.beams.len() > self.num_beams {
                if let Some(worst) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map(|(i, _)| i)
                {
                    self.beams.remove(worst);
                }
            }
        }
    }

    fn is_done(&self, best_running: f32, generated_len: usize) -> bool {
        if self.beams.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score() >= self.normalized(best_running, generated_len)
    }

    fn into_sorted(mut self) -> Vec<(f32, Vec<i64>)> {
        self.beams.sort_by(|a, b| b.0.total_cmp(&a.0));
        self.beams
    }
}

/// One-shot convenience over [`Generator`].
pub fn generate<M: CausalLanguageModel>(
    model: &M,
    input_ids: &Tensor,
    attention_mask: &Tensor,
    config: GenerationConfig,
    rng: &mut dyn RngCore,
) -> Result<GenerationOutput> {
    Generator::new(model, config)?.generate(input_ids, attention_mask, rng)
}
