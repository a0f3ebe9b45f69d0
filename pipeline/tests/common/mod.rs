//! In-memory tokenizer, sessions and processors shared by the pipeline tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use xmodal_onnx_loader::{InferenceSession, Result as OnnxResult, TensorSpec};
use xmodal_pipeline::{AudioProcessor, ImageProcessor, RawImage, Result};
use xmodal_tokenization::{
    BatchEncoding, ChatMessage, EncodeOptions, PaddingSide, Result as TokResult, TextTokenizer,
};
use xmodal_values::{Tensor, TensorMap};

pub const PAD: i64 = 0;
pub const CLS: i64 = 1;
pub const SEP: i64 = 2;
pub const MASK: i64 = 3;
pub const EOS: i64 = 4;

const SPECIAL: [&str; 5] = ["[PAD]", "[CLS]", "[SEP]", "[MASK]", "</s>"];

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Whitespace tokenizer that assigns ids to new words as it sees them.
pub struct WordTokenizer {
    vocab: Mutex<Vec<String>>,
    special_ids: Vec<i64>,
    with_sep: bool,
    /// Texts and row widths of every encode call.
    pub calls: Mutex<Vec<(Vec<String>, usize)>>,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self {
            vocab: Mutex::new(SPECIAL.iter().map(|s| s.to_string()).collect()),
            special_ids: vec![PAD, CLS, SEP, MASK, EOS],
            with_sep: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_sep() -> Self {
        Self { with_sep: false, ..Self::new() }
    }

    pub fn id(&self, word: &str) -> i64 {
        let mut vocab = self.vocab.lock().unwrap();
        match vocab.iter().position(|w| w == word) {
            Some(i) => i as i64,
            None => {
                vocab.push(word.to_string());
                (vocab.len() - 1) as i64
            }
        }
    }

    fn word(&self, id: i64) -> String {
        self.vocab.lock().unwrap()[id as usize].clone()
    }

    fn words(&self, text: &str) -> Vec<i64> {
        text.split_whitespace().map(|w| self.id(w)).collect()
    }

    fn finish(&self, texts: Vec<String>, rows: Vec<Vec<i64>>, options: &EncodeOptions) -> TokResult<BatchEncoding> {
        let side = options.padding_side.unwrap_or(PaddingSide::Right);
        let min_width = if options.pad_to_max_length { options.max_length.unwrap_or(8) } else { 0 };
        let encoding = BatchEncoding::from_rows_with_width(rows, None, PAD, side, options.padding, min_width)?;
        self.calls.lock().unwrap().push((texts, encoding.seq_len()));
        Ok(encoding)
    }
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, texts: &[String], options: &EncodeOptions) -> TokResult<BatchEncoding> {
        let rows = texts
            .iter()
            .map(|t| {
                let ids = self.words(t);
                if options.add_special_tokens {
                    [vec![CLS], ids, vec![SEP]].concat()
                } else {
                    ids
                }
            })
            .collect();
        self.finish(texts.to_vec(), rows, options)
    }

    fn encode_pairs(&self, pairs: &[(String, String)], options: &EncodeOptions) -> TokResult<BatchEncoding> {
        let rows = pairs
            .iter()
            .map(|(a, b)| {
                let sep = if self.with_sep { vec![SEP] } else { vec![] };
                [vec![CLS], self.words(a), sep.clone(), self.words(b), sep].concat()
            })
            .collect();
        let texts = pairs.iter().map(|(a, b)| format!("{a} | {b}")).collect();
        self.finish(texts, rows, options)
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> TokResult<String> {
        Ok(ids
            .iter()
            .filter(|id| !(skip_special_tokens && self.special_ids.contains(id)))
            .map(|&id| self.word(id))
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn mask_token(&self) -> Option<&str> {
        Some("[MASK]")
    }

    fn mask_token_id(&self) -> Option<i64> {
        Some(MASK)
    }

    fn sep_token_id(&self) -> Option<i64> {
        self.with_sep.then_some(SEP)
    }

    fn eos_token_id(&self) -> Option<i64> {
        Some(EOS)
    }

    fn pad_token_id(&self) -> Option<i64> {
        Some(PAD)
    }

    fn all_special_ids(&self) -> &[i64] {
        &self.special_ids
    }

    fn padding_side(&self) -> PaddingSide {
        PaddingSide::Right
    }

    fn apply_chat_template(&self, messages: &[ChatMessage], add_generation_prompt: bool) -> TokResult<String> {
        let mut prompt: Vec<String> =
            messages.iter().map(|m| format!("<{}> {}", m.role, m.content)).collect();
        if add_generation_prompt {
            prompt.push("<assistant>".to_string());
        }
        Ok(prompt.join(" "))
    }
}

/// SentencePiece-style tokenizer over a fixed piece table. `▁` marks a word
/// start and decoding drops the space it produces at the start of a text.
pub struct PieceTokenizer {
    pieces: Vec<&'static str>,
    special_ids: Vec<i64>,
}

impl PieceTokenizer {
    pub fn new() -> Self {
        let mut pieces = SPECIAL.to_vec();
        pieces.extend(["\u{2581}New", "\u{2581}Yo", "rk", "\u{2581}City", "\u{2581}"]);
        Self { pieces, special_ids: vec![PAD, CLS, SEP, MASK, EOS] }
    }

    pub fn id(&self, piece: &str) -> i64 {
        self.pieces.iter().position(|p| *p == piece).map_or(-1, |i| i as i64)
    }

    /// Greedy longest match over `▁`-joined words.
    fn pieces_of(&self, text: &str) -> Vec<i64> {
        let normalized: String = text.split_whitespace().map(|w| format!("\u{2581}{w}")).collect();
        let mut rest = normalized.as_str();
        let mut ids = Vec::new();
        while !rest.is_empty() {
            let (id, len) = self
                .pieces
                .iter()
                .enumerate()
                .skip(SPECIAL.len())
                .filter(|(_, p)| rest.starts_with(**p))
                .map(|(i, p)| (i as i64, p.len()))
                .max_by_key(|&(_, len)| len)
                .unwrap_or_else(|| panic!("no piece matches {rest:?}"));
            ids.push(id);
            rest = &rest[len..];
        }
        ids
    }
}

impl TextTokenizer for PieceTokenizer {
    fn encode(&self, texts: &[String], options: &EncodeOptions) -> TokResult<BatchEncoding> {
        let rows = texts.iter().map(|t| self.pieces_of(t)).collect();
        let side = options.padding_side.unwrap_or(PaddingSide::Right);
        BatchEncoding::from_rows_with_width(rows, None, PAD, side, options.padding, 0)
    }

    fn encode_pairs(&self, pairs: &[(String, String)], options: &EncodeOptions) -> TokResult<BatchEncoding> {
        let texts: Vec<String> = pairs.iter().map(|(a, b)| format!("{a} {b}")).collect();
        self.encode(&texts, options)
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> TokResult<String> {
        let text: String = ids
            .iter()
            .filter(|id| !(skip_special_tokens && self.special_ids.contains(id)))
            .map(|&id| self.pieces[id as usize].replace('\u{2581}', " "))
            .collect();
        Ok(text.strip_prefix(' ').map(str::to_string).unwrap_or(text))
    }

    fn mask_token(&self) -> Option<&str> {
        None
    }

    fn mask_token_id(&self) -> Option<i64> {
        None
    }

    fn sep_token_id(&self) -> Option<i64> {
        None
    }

    fn eos_token_id(&self) -> Option<i64> {
        Some(EOS)
    }

    fn pad_token_id(&self) -> Option<i64> {
        Some(PAD)
    }

    fn all_special_ids(&self) -> &[i64] {
        &self.special_ids
    }

    fn padding_side(&self) -> PaddingSide {
        PaddingSide::Left
    }

    fn apply_chat_template(&self, messages: &[ChatMessage], _add_generation_prompt: bool) -> TokResult<String> {
        Ok(messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join(" "))
    }
}

type RunFn = Box<dyn Fn(&TensorMap) -> OnnxResult<TensorMap> + Send + Sync>;

/// Session backed by a closure, counting calls.
pub struct FnSession {
    run: RunFn,
    pub calls: AtomicUsize,
}

impl FnSession {
    pub fn new(run: impl Fn(&TensorMap) -> OnnxResult<TensorMap> + Send + Sync + 'static) -> Self {
        Self { run: Box::new(run), calls: AtomicUsize::new(0) }
    }

    /// Always returns the same outputs.
    pub fn fixed(outputs: TensorMap) -> Self {
        Self::new(move |_| Ok(outputs.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceSession for FnSession {
    fn run(&self, inputs: TensorMap) -> OnnxResult<TensorMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.run)(&inputs)
    }

    fn inputs(&self) -> &[TensorSpec] {
        &[]
    }

    fn outputs(&self) -> &[TensorSpec] {
        &[]
    }
}

/// `pixel_values` of zeros, `[n, 3, 2, 2]`.
pub struct ZeroImageProcessor;

impl ImageProcessor for ZeroImageProcessor {
    fn process(&self, images: &[RawImage]) -> Result<TensorMap> {
        Ok(TensorMap::new().with("pixel_values", Tensor::zeros_f32(vec![images.len(), 3, 2, 2])))
    }
}

/// Wraps the waveform as `[1, n]` input values.
pub struct PassthroughAudioProcessor;

impl AudioProcessor for PassthroughAudioProcessor {
    fn sampling_rate(&self) -> u32 {
        16_000
    }

    fn process(&self, audio: &[f32]) -> Result<TensorMap> {
        Ok(TensorMap::new().with("input_values", Tensor::from_f32(audio.to_vec(), vec![1, audio.len()])?))
    }
}

pub fn image(width: usize, height: usize) -> RawImage {
    RawImage::new(width, height, 3, vec![128; width * height * 3]).unwrap()
}

pub fn image_json(width: usize, height: usize) -> serde_json::Value {
    serde_json::to_value(image(width, height)).unwrap()
}

pub fn f32_tensor(data: Vec<f32>, dims: Vec<usize>) -> Tensor {
    Tensor::from_f32(data, dims).unwrap()
}
