//! Generation loop tests against scripted in-memory models.

use std::cell::RefCell;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use xmodal_onnx_loader::{
    generate, BeamSearchParams, CausalLanguageModel, CausalLmOutput, DecoderCache, DecodingStrategy,
    GenerationConfig, Generator, InferenceSession, OnnxCausalLm, OnnxError, Result, SamplingParams, TensorSpec,
};
use xmodal_values::{Tensor, TensorDataType, TensorMap};

const PAD: i64 = 0;
const A: i64 = 1;
const B: i64 = 2;
const C: i64 = 3;
const EOS: i64 = 4;
const VOCAB: usize = 5;

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Each row follows its own token script; the step is the cache.
struct ScriptedLm {
    scripts: Vec<Vec<i64>>,
    inputs: RefCell<Vec<Vec<usize>>>,
}

impl ScriptedLm {
    fn new(scripts: Vec<Vec<i64>>) -> Self {
        Self { scripts, inputs: RefCell::new(Vec::new()) }
    }

    fn calls(&self) -> usize {
        self.inputs.borrow().len()
    }
}

impl CausalLanguageModel for ScriptedLm {
    type Cache = usize;

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, cache: Option<usize>) -> Result<CausalLmOutput<usize>> {
        let step = cache.unwrap_or(0);
        self.inputs.borrow_mut().push(input_ids.dims().to_vec());
        assert_eq!(attention_mask.dims()[1], if step == 0 { input_ids.dims()[1] } else { 3 + step });

        let rows = input_ids.dims()[0];
        let mut logits = vec![0.0f32; rows * VOCAB];
        for row in 0..rows {
            let script = &self.scripts[row];
            let token = script[step.min(script.len() - 1)];
            logits[row * VOCAB + token as usize] = 10.0;
        }
        Ok(CausalLmOutput { logits: Tensor::from_f32(logits, vec![rows, VOCAB])?, cache: step + 1 })
    }

    fn reorder_cache(&self, cache: usize, _beam_indices: &[usize]) -> Result<usize> {
        Ok(cache)
    }
}

/// Next-token distribution depends only on the last token of each row.
struct BigramLm {
    reorders: RefCell<Vec<Vec<usize>>>,
}

impl BigramLm {
    fn new() -> Self {
        Self { reorders: RefCell::new(Vec::new()) }
    }

    fn distribution(last: i64) -> [f32; VOCAB] {
        match last {
            A | C => [1e-6, 0.25, 0.25, 0.25, 0.25],
            B => [1e-6, 0.0166, 0.0166, 0.0166, 0.95],
            _ => [1e-6, 0.6, 0.4, 1e-6, 1e-6],
        }
    }
}

impl CausalLanguageModel for BigramLm {
    type Cache = ();

    fn forward(&self, input_ids: &Tensor, _attention_mask: &Tensor, _cache: Option<()>) -> Result<CausalLmOutput<()>> {
        let dims = input_ids.dims();
        let ids = input_ids.as_i64()?;
        let mut logits = Vec::with_capacity(dims[0] * VOCAB);
        for row in ids.chunks(dims[1]) {
            let last = row[row.len() - 1];
            logits.extend(Self::distribution(last).iter().map(|p| p.ln()));
        }
        Ok(CausalLmOutput { logits: Tensor::from_f32(logits, vec![dims[0], VOCAB])?, cache: () })
    }

    fn reorder_cache(&self, cache: (), beam_indices: &[usize]) -> Result<()> {
        self.reorders.borrow_mut().push(beam_indices.to_vec());
        Ok(cache)
    }
}

fn prompt(rows: usize) -> (Tensor, Tensor) {
    let ids: Vec<i64> = (0..rows).flat_map(|r| vec![7, 8, 9 + r as i64]).collect();
    (
        Tensor::from_i64(ids, vec![rows, 3]).unwrap(),
        Tensor::ones_i64(vec![rows, 3]),
    )
}

fn greedy_config(max_new_tokens: usize) -> GenerationConfig {
    GenerationConfig::default()
        .with_eos_token_ids(vec![EOS])
        .with_max_new_tokens(Some(max_new_tokens))
}

#[test]
fn test_greedy_stops_rows_independently() {
    setup();
    let model = ScriptedLm::new(vec![vec![A, B, EOS], vec![C, EOS]]);
    let (ids, mask) = prompt(2);
    let mut rng = StdRng::seed_from_u64(0);

    let out = generate(&model, &ids, &mask, greedy_config(10), &mut rng).unwrap();

    assert_eq!(out.sequences.len(), 2);
    assert_eq!(out.sequences[0], vec![7, 8, 9, A, B, EOS]);
    // The finished row is fed padding but nothing is appended.
    assert_eq!(out.sequences[1], vec![7, 8, 10, C, EOS]);
    assert_eq!(model.calls(), 3);

    let inputs = model.inputs.borrow();
    assert_eq!(inputs[0], vec![2, 3]);
    assert_eq!(inputs[1], vec![2, 1]);
    assert_eq!(inputs[2], vec![2, 1]);
}

#[test]
fn test_greedy_respects_token_budget() {
    setup();
    let model = ScriptedLm::new(vec![vec![A, B, C, EOS]]);
    let (ids, mask) = prompt(1);
    let mut rng = StdRng::seed_from_u64(0);

    let out = generate(&model, &ids, &mask, greedy_config(2), &mut rng).unwrap();

    assert_eq!(out.sequences, vec![vec![7, 8, 9, A, B]]);
    assert_eq!(model.calls(), 2);
}

#[test]
fn test_missing_eos_is_rejected_before_any_step() {
    setup();
    let model = ScriptedLm::new(vec![vec![A]]);
    let config = GenerationConfig::default().with_max_new_tokens(Some(5));

    let err = Generator::new(&model, config).err().expect("config without eos must be rejected");

    assert!(matches!(err, OnnxError::Configuration(_)));
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_invalid_strategy_parameters_are_rejected() {
    let model = ScriptedLm::new(vec![vec![A]]);
    let base = greedy_config(4);

    let cases = vec![
        base.clone().with_num_return_sequences(2),
        base.clone().with_strategy(DecodingStrategy::Sample(SamplingParams { temperature: 0.0, ..Default::default() })),
        base.clone().with_strategy(DecodingStrategy::Sample(SamplingParams { top_p: Some(1.5), ..Default::default() })),
        base.clone().with_strategy(DecodingStrategy::BeamSearch(BeamSearchParams { num_beams: 0, ..Default::default() })),
        base
            .clone()
            .with_strategy(DecodingStrategy::BeamSearch(BeamSearchParams { num_beams: 2, ..Default::default() }))
            .with_num_return_sequences(3),
    ];
    for config in cases {
        let result = Generator::new(&model, config.clone());
        assert!(
            matches!(result, Err(OnnxError::Configuration(_))),
            "accepted {:?}",
            config
        );
    }
}

#[test]
fn test_sampling_is_reproducible_and_row_interleaved() {
    setup();
    let model = BigramLm::new();
    let (ids, mask) = prompt(2);
    let config = greedy_config(4)
        .with_strategy(DecodingStrategy::Sample(SamplingParams { temperature: 1.0, top_k: Some(3), top_p: Some(0.95) }))
        .with_num_return_sequences(2);

    let first = generate(&model, &ids, &mask, config.clone(), &mut StdRng::seed_from_u64(11)).unwrap();
    let second = generate(&model, &ids, &mask, config, &mut StdRng::seed_from_u64(11)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.sequences.len(), 4);
    for seq in first.for_prompt(0) {
        assert_eq!(&seq[..3], &[7, 8, 9]);
    }
    for seq in first.for_prompt(1) {
        assert_eq!(&seq[..3], &[7, 8, 10]);
    }
    for seq in &first.sequences {
        assert!(seq.len() > 3 && seq.len() <= 7);
        assert!(seq[3..].iter().all(|&t| t != PAD));
    }
}

#[test]
fn test_beam_search_finds_better_sequence_than_greedy() {
    setup();
    let (ids, mask) = prompt(1);
    let mut rng = StdRng::seed_from_u64(0);

    let greedy = generate(&BigramLm::new(), &ids, &mask, greedy_config(3), &mut rng).unwrap();
    assert_eq!(greedy.sequences[0], vec![7, 8, 9, A, A, A]);

    let model = BigramLm::new();
    let config = greedy_config(3)
        .with_strategy(DecodingStrategy::BeamSearch(BeamSearchParams {
            num_beams: 2,
            length_penalty: 1.0,
            early_stopping: false,
        }))
        .with_num_return_sequences(2);
    let beams = generate(&model, &ids, &mask, config, &mut rng).unwrap();

    assert_eq!(beams.sequences.len(), 2);
    assert_eq!(beams.sequences[0], vec![7, 8, 9, B, EOS]);
    assert_eq!(beams.sequences[1].last(), Some(&EOS));
    // Only beam 0 is live on the first step, so both new beams come from it.
    assert_eq!(model.reorders.borrow()[0], vec![0, 0]);
}

#[test]
fn test_beam_search_batch_keeps_prompt_order() {
    setup();
    let (ids, mask) = prompt(3);
    let config = greedy_config(4).with_strategy(DecodingStrategy::BeamSearch(BeamSearchParams {
        num_beams: 3,
        length_penalty: 1.0,
        early_stopping: true,
    }));

    let out = generate(&BigramLm::new(), &ids, &mask, config, &mut StdRng::seed_from_u64(0)).unwrap();

    assert_eq!(out.sequences.len(), 3);
    for (i, seq) in out.sequences.iter().enumerate() {
        assert_eq!(&seq[..3], &[7, 8, 9 + i as i64]);
    }
}

/// A decoder graph with one cache layer, `[batch, 2, past, 4]`.
struct CachedDecoder {
    specs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    seen: Mutex<Vec<TensorMap>>,
}

impl CachedDecoder {
    fn new() -> Self {
        let cache_shape = vec![-1, 2, -1, 4];
        Self {
            specs: vec![
                TensorSpec::new("input_ids").with_dtype(TensorDataType::Int64),
                TensorSpec::new("attention_mask").with_dtype(TensorDataType::Int64),
                TensorSpec::new("position_ids").with_dtype(TensorDataType::Int64),
                TensorSpec::new("past_key_values.0.key").with_shape(cache_shape.clone()),
                TensorSpec::new("past_key_values.0.value").with_shape(cache_shape),
            ],
            outputs: vec![
                TensorSpec::new("logits"),
                TensorSpec::new("present.0.key"),
                TensorSpec::new("present.0.value"),
            ],
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl InferenceSession for CachedDecoder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap> {
        let ids = inputs.require("input_ids")?;
        let (batch, seq) = (ids.dims()[0], ids.dims()[1]);
        let past = inputs.require("past_key_values.0.key")?.dims()[2];
        self.seen.lock().unwrap().push(inputs.clone());

        let mut logits = vec![0.0f32; batch * seq * VOCAB];
        for row in 0..batch {
            let last = (row * seq + seq - 1) * VOCAB;
            let next = if past + seq >= 4 { EOS } else { A };
            logits[last + next as usize] = 5.0;
        }
        let present = Tensor::zeros_f32(vec![batch, 2, past + seq, 4]);
        Ok(TensorMap::new()
            .with("logits", Tensor::from_f32(logits, vec![batch, seq, VOCAB])?)
            .with("present.0.key", present.clone())
            .with("present.0.value", present))
    }

    fn inputs(&self) -> &[TensorSpec] {
        &self.specs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }
}

#[test]
fn test_onnx_causal_lm_threads_past_key_values() {
    setup();
    let session = std::sync::Arc::new(CachedDecoder::new());
    let model = OnnxCausalLm::new(session.clone()).unwrap();
    assert_eq!(model.num_layers(), 1);

    let ids = Tensor::from_i64(vec![PAD, 7, 8], vec![1, 3]).unwrap();
    let mask = Tensor::from_i64(vec![0, 1, 1], vec![1, 3]).unwrap();
    let out = generate(&model, &ids, &mask, greedy_config(5), &mut StdRng::seed_from_u64(0)).unwrap();

    assert_eq!(out.sequences[0], vec![PAD, 7, 8, A, EOS]);

    let seen = session.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].require("past_key_values.0.key").unwrap().dims(), &[1, 2, 0, 4]);
    assert_eq!(seen[0].require("position_ids").unwrap().as_i64().unwrap(), &[1, 0, 1]);
    assert_eq!(seen[1].require("past_key_values.0.value").unwrap().dims(), &[1, 2, 3, 4]);
    assert_eq!(seen[1].require("position_ids").unwrap().as_i64().unwrap(), &[2]);
    assert_eq!(seen[1].require("attention_mask").unwrap().dims(), &[1, 4]);
}

#[test]
fn test_onnx_causal_lm_reorders_cache_rows() {
    let model = OnnxCausalLm::new(std::sync::Arc::new(CachedDecoder::new())).unwrap();
    let key = Tensor::from_f32((0..16).map(|x| x as f32).collect(), vec![2, 2, 1, 4]).unwrap();
    let cache = DecoderCache::PastKeyValues(
        TensorMap::new()
            .with("past_key_values.0.key", key.clone())
            .with("past_key_values.0.value", key),
    );

    let DecoderCache::PastKeyValues(reordered) = model.reorder_cache(cache, &[1, 1]).unwrap() else {
        panic!("cache kind changed");
    };
    let values = reordered.require("past_key_values.0.key").unwrap().as_f32().unwrap();
    assert_eq!(&values[..8], &values[8..]);
    assert_eq!(values[0], 8.0);
}
