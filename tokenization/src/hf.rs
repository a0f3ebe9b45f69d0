//! [`TextTokenizer`] backed by HuggingFace's `tokenizers` crate.

use std::path::Path;

use serde::Deserialize;
use tokenizers::{EncodeInput, Tokenizer, TruncationParams};

use crate::chat::{ChatMessage, ChatTemplate};
use crate::encoding::{BatchEncoding, EncodeOptions, PaddingSide};
use crate::error::{Result, TokenizationError};
use crate::TextTokenizer;

const MASK_CANDIDATES: &[&str] = &["[MASK]", "<mask>"];
const SEP_CANDIDATES: &[&str] = &["[SEP]", "</s>"];
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|im_end|>", "<eos>", "[SEP]"];
const PAD_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|endoftext|>"];
const BOS_CANDIDATES: &[&str] = &["<s>", "<bos>", "[CLS]"];

/// `tokenizer_config.json` fields this crate reads.
#[derive(Debug, Default, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub mask_token: Option<TokenSpec>,
    #[serde(default)]
    pub sep_token: Option<TokenSpec>,
    #[serde(default)]
    pub eos_token: Option<TokenSpec>,
    #[serde(default)]
    pub pad_token: Option<TokenSpec>,
    #[serde(default)]
    pub bos_token: Option<TokenSpec>,
    #[serde(default)]
    pub padding_side: Option<PaddingSide>,
    #[serde(default)]
    pub chat_template: Option<TemplateSpec>,
    #[serde(default)]
    pub model_max_length: Option<f64>,
}

/// A special token given either as a plain string or as an AddedToken object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenSpec {
    Plain(String),
    Added { content: String },
}

impl TokenSpec {
    pub fn content(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Added { content } => content,
        }
    }
}

/// A single template, or a list of named templates of which `default` is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TemplateSpec {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedTemplate {
    pub name: String,
    pub template: String,
}

impl TemplateSpec {
    fn default_source(&self) -> Option<&str> {
        match self {
            Self::Single(s) => Some(s),
            Self::Named(list) => list
                .iter()
                .find(|t| t.name == "default")
                .or_else(|| list.first())
                .map(|t| t.template.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SpecialTokens {
    mask: Option<(String, i64)>,
    sep: Option<i64>,
    eos: Option<i64>,
    pad: Option<i64>,
    all: Vec<i64>,
}

/// Fast tokenizer loaded from `tokenizer.json` (and optionally `tokenizer_config.json`).
pub struct HfTokenizer {
    inner: Tokenizer,
    special: SpecialTokens,
    padding_side: PaddingSide,
    chat_template: ChatTemplate,
    model_max_length: Option<usize>,
}

impl HfTokenizer {
    /// Load tokenizer from file (tokenizer.json)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = Tokenizer::from_file(path.as_ref())
            .map_err(|e| TokenizationError::LoadFailed(e.to_string()))?;
        Self::with_config(inner, TokenizerConfig::default())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = Tokenizer::from_bytes(bytes)
            .map_err(|e| TokenizationError::LoadFailed(e.to_string()))?;
        Self::with_config(inner, TokenizerConfig::default())
    }

    /// Load `tokenizer.json` and, when present, `tokenizer_config.json` from a model directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let inner = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| TokenizationError::LoadFailed(e.to_string()))?;

        let config_path = dir.join("tokenizer_config.json");
        let config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .map_err(|e| TokenizationError::LoadFailed(format!("{}: {e}", config_path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| TokenizationError::LoadFailed(format!("{}: {e}", config_path.display())))?
        } else {
            TokenizerConfig::default()
        };
        Self::with_config(inner, config)
    }

    pub fn with_config(mut inner: Tokenizer, config: TokenizerConfig) -> Result<Self> {
        // Padding is applied per call so the side can differ between callers.
        inner.with_padding(None);

        let lookup = |spec: &Option<TokenSpec>, candidates: &[&str]| -> Option<(String, i64)> {
            spec.as_ref()
                .and_then(|s| inner.token_to_id(s.content()).map(|id| (s.content().to_string(), id as i64)))
                .or_else(|| {
                    candidates
                        .iter()
                        .find_map(|c| inner.token_to_id(c).map(|id| (c.to_string(), id as i64)))
                })
        };

        let mask = lookup(&config.mask_token, MASK_CANDIDATES);
        let sep = lookup(&config.sep_token, SEP_CANDIDATES);
        let eos = lookup(&config.eos_token, EOS_CANDIDATES);
        let pad = lookup(&config.pad_token, PAD_CANDIDATES);
        let bos = lookup(&config.bos_token, BOS_CANDIDATES);

        let mut all: Vec<i64> = inner
            .get_added_tokens_decoder()
            .iter()
            .filter(|(_, token)| token.special)
            .map(|(&id, _)| id as i64)
            .collect();
        all.sort_unstable();

        let chat_template = config
            .chat_template
            .as_ref()
            .and_then(TemplateSpec::default_source)
            .map(ChatTemplate::new)
            .unwrap_or_default()
            .with_tokens(bos.map(|b| b.0), eos.as_ref().map(|e| e.0.clone()));

        // Configs without a real limit store a huge sentinel (1e30).
        let model_max_length = config
            .model_max_length
            .filter(|&m| m > 0.0 && m < 1e9)
            .map(|m| m as usize);

        log::debug!(
            "Loaded tokenizer: vocab={}, special ids={}, mask={:?}, eos={:?}",
            inner.get_vocab_size(true),
            all.len(),
            mask.as_ref().map(|m| m.0.as_str()),
            eos.as_ref().map(|e| e.1)
        );

        Ok(Self {
            inner,
            special: SpecialTokens {
                mask,
                sep: sep.map(|s| s.1),
                eos: eos.map(|e| e.1),
                pad: pad.map(|p| p.1),
                all,
            },
            padding_side: config.padding_side.unwrap_or_default(),
            chat_template,
            model_max_length,
        })
    }

    /// Default padding side for calls that do not override it.
    pub fn set_padding_side(&mut self, side: PaddingSide) {
        self.padding_side = side;
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }

    /// Tokenizer to run a call with, reconfigured when the call asks for truncation.
    fn tokenizer_for(&self, options: &EncodeOptions) -> Result<std::borrow::Cow<'_, Tokenizer>> {
        let max_length = options.max_length.or(self.model_max_length);
        match (options.truncation, max_length) {
            (true, Some(max_length)) => {
                let mut tokenizer = self.inner.clone();
                tokenizer
                    .with_truncation(Some(TruncationParams { max_length, ..Default::default() }))
                    .map_err(|e| TokenizationError::EncodeFailed(e.to_string()))?;
                Ok(std::borrow::Cow::Owned(tokenizer))
            }
            _ => Ok(std::borrow::Cow::Borrowed(&self.inner)),
        }
    }

    fn encode_inputs<'s>(&self, inputs: Vec<EncodeInput<'s>>, options: &EncodeOptions) -> Result<BatchEncoding> {
        let tokenizer = self.tokenizer_for(options)?;
        let encodings = tokenizer
            .encode_batch(inputs, options.add_special_tokens)
            .map_err(|e| TokenizationError::EncodeFailed(e.to_string()))?;

        let rows = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i64).collect())
            .collect();
        let type_ids = encodings
            .iter()
            .map(|e| e.get_type_ids().iter().map(|&id| id as i64).collect())
            .collect();

        let min_width = if options.pad_to_max_length {
            options.max_length.or(self.model_max_length).unwrap_or(0)
        } else {
            0
        };
        BatchEncoding::from_rows_with_width(
            rows,
            Some(type_ids),
            self.special.pad.unwrap_or(0),
            options.padding_side.unwrap_or(self.padding_side),
            options.padding,
            min_width,
        )
    }
}

fn to_u32_ids(ids: &[i64]) -> Result<Vec<u32>> {
    ids.iter()
        .map(|&id| {
            u32::try_from(id).map_err(|_| TokenizationError::InvalidInput(format!("invalid token id {id}")))
        })
        .collect()
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<BatchEncoding> {
        let inputs = texts.iter().map(|t| EncodeInput::from(t.as_str())).collect();
        self.encode_inputs(inputs, options)
    }

    fn encode_pairs(&self, pairs: &[(String, String)], options: &EncodeOptions) -> Result<BatchEncoding> {
        let inputs = pairs
            .iter()
            .map(|(a, b)| EncodeInput::from((a.as_str(), b.as_str())))
            .collect();
        self.encode_inputs(inputs, options)
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(&to_u32_ids(ids)?, skip_special_tokens)
            .map_err(|e| TokenizationError::DecodeFailed(e.to_string()))
    }

    fn decode_batch(&self, sequences: &[Vec<i64>], skip_special_tokens: bool) -> Result<Vec<String>> {
        let owned = sequences
            .iter()
            .map(|s| to_u32_ids(s))
            .collect::<Result<Vec<_>>>()?;
        let borrowed: Vec<&[u32]> = owned.iter().map(Vec::as_slice).collect();
        self.inner
            .decode_batch(&borrowed, skip_special_tokens)
            .map_err(|e| TokenizationError::DecodeFailed(e.to_string()))
    }

    fn mask_token(&self) -> Option<&str> {
        self.special.mask.as_ref().map(|m| m.0.as_str())
    }

    fn mask_token_id(&self) -> Option<i64> {
        self.special.mask.as_ref().map(|m| m.1)
    }

    fn sep_token_id(&self) -> Option<i64> {
        self.special.sep
    }

    fn eos_token_id(&self) -> Option<i64> {
        self.special.eos
    }

    fn pad_token_id(&self) -> Option<i64> {
        self.special.pad
    }

    fn all_special_ids(&self) -> &[i64] {
        &self.special.all
    }

    fn padding_side(&self) -> PaddingSide {
        self.padding_side
    }

    fn apply_chat_template(&self, messages: &[ChatMessage], add_generation_prompt: bool) -> Result<String> {
        self.chat_template.render(messages, add_generation_prompt)
    }
}
