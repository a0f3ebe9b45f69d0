/// Text generation
///
/// Prompts are plain strings or chats. Chats are rendered with the
/// tokenizer's chat template and come back as the same conversation with
/// an assistant turn appended.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xmodal_common::InferenceSettings;
use xmodal_onnx_loader::{generate, CausalLanguageModel, GenerationConfig, OnnxCausalLm};
use xmodal_tokenization::{ChatMessage, EncodeOptions, TextTokenizer};

use super::{rng_from_seed, TaskHandler};
use crate::error::Result;
use crate::input::{Batch, Output, TextInput};
use crate::model_config::ModelConfig;
use crate::types::PipelineType;

/// Per-call overrides of the pipeline's generation settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextGenerationOptions {
    /// Include the prompt in `generated_text`. Forced off for chats.
    pub return_full_text: Option<bool>,
    pub add_special_tokens: Option<bool>,
    pub max_new_tokens: Option<u32>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub num_beams: Option<u32>,
    pub num_return_sequences: Option<u32>,
    pub repetition_penalty: Option<f32>,
    pub length_penalty: Option<f32>,
    pub early_stopping: Option<bool>,
    /// Fixes the random source for sampling.
    pub seed: Option<u64>,
}

impl TextGenerationOptions {
    fn apply(&self, base: &InferenceSettings) -> InferenceSettings {
        let mut s = base.clone();
        if let Some(v) = self.max_new_tokens {
            s.max_new_tokens = v;
        }
        if let Some(v) = self.do_sample {
            s.do_sample = v;
        }
        if let Some(v) = self.temperature {
            s.temperature = v;
        }
        if let Some(v) = self.top_k {
            s.top_k = v;
        }
        if let Some(v) = self.top_p {
            s.top_p = v;
        }
        if let Some(v) = self.num_beams {
            s.num_beams = v;
        }
        if let Some(v) = self.num_return_sequences {
            s.num_return_sequences = v;
        }
        if let Some(v) = self.repetition_penalty {
            s.repetition_penalty = v;
        }
        if let Some(v) = self.length_penalty {
            s.length_penalty = v;
        }
        if let Some(v) = self.early_stopping {
            s.early_stopping = v;
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeneratedContent {
    Text(String),
    Chat(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedText {
    pub generated_text: GeneratedContent,
}

pub struct TextGenerationPipeline<M = OnnxCausalLm> {
    tokenizer: Arc<dyn TextTokenizer>,
    model: M,
    settings: InferenceSettings,
    eos_token_ids: Vec<i64>,
    pad_token_id: Option<i64>,
}

impl<M: CausalLanguageModel + Send + Sync> TextGenerationPipeline<M> {
    /// Greedy decoding of up to 20 new tokens unless overridden. End-of-sequence
    /// ids come from the model config, else from the tokenizer.
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, model: M, config: &ModelConfig) -> Self {
        let mut eos_token_ids = config.eos_token_ids();
        if eos_token_ids.is_empty() {
            eos_token_ids.extend(tokenizer.eos_token_id());
        }
        let pad_token_id = config.pad_token_id.or_else(|| tokenizer.pad_token_id());
        Self { tokenizer, model, settings: InferenceSettings::greedy(20), eos_token_ids, pad_token_id }
    }

    /// Replaces the default settings, e.g. with `InferenceSettings::for_model(repo_id)`.
    pub fn with_settings(mut self, settings: InferenceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    fn render_prompts(&self, items: &[TextInput]) -> Result<Vec<String>> {
        items
            .iter()
            .map(|item| match item {
                TextInput::Text(text) => Ok(text.clone()),
                TextInput::Chat(messages) => Ok(self.tokenizer.apply_chat_template(messages, true)?),
            })
            .collect()
    }
}

impl<M: CausalLanguageModel + Send + Sync> TaskHandler for TextGenerationPipeline<M> {
    type Input = TextInput;
    type Options = TextGenerationOptions;
    type Output = Output<Vec<GeneratedText>>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::TextGeneration
    }

    fn process(&self, batch: Batch<TextInput>, options: &TextGenerationOptions) -> Result<Self::Output> {
        let is_chat = batch.items().iter().any(TextInput::is_chat);
        let prompts = self.render_prompts(batch.items())?;

        // Chat templates already carry their special tokens.
        let add_special_tokens = !is_chat && options.add_special_tokens.unwrap_or(false);
        let return_full_text = !is_chat && options.return_full_text.unwrap_or(true);

        let mut encode_options = EncodeOptions::default().left_padded().truncated(None);
        encode_options.add_special_tokens = add_special_tokens;
        let encoding = self.tokenizer.encode(&prompts, &encode_options)?;

        let config = GenerationConfig::from_settings(&options.apply(&self.settings))
            .with_eos_token_ids(self.eos_token_ids.clone())
            .with_pad_token_id(self.pad_token_id);
        let mut rng = rng_from_seed(options.seed);
        let output = generate(&self.model, &encoding.input_ids, &encoding.attention_mask, config, &mut rng)?;

        // Trim by decoded characters, not tokens: merges at the prompt boundary
        // can change the token split.
        let prompt_chars: Vec<usize> = if return_full_text {
            Vec::new()
        } else {
            let rows = (0..encoding.batch_size())
                .map(|row| Ok(encoding.row_ids(row)?.to_vec()))
                .collect::<Result<Vec<_>>>()?;
            self.tokenizer
                .decode_batch(&rows, true)?
                .iter()
                .map(|p| p.chars().count())
                .collect()
        };

        let mut results = Vec::with_capacity(batch.len());
        for (index, item) in batch.items().iter().enumerate() {
            let decoded = self.tokenizer.decode_batch(output.for_prompt(index), true)?;
            let texts = decoded.into_iter().map(|text| match prompt_chars.get(index) {
                Some(&skip) => text.chars().skip(skip).collect(),
                None => text,
            });
            let generated = texts
                .map(|text| {
                    let generated_text = match item {
                        TextInput::Chat(messages) => {
                            let mut chat = messages.clone();
                            chat.push(ChatMessage::assistant(text));
                            GeneratedContent::Chat(chat)
                        }
                        TextInput::Text(_) => GeneratedContent::Text(text),
                    };
                    GeneratedText { generated_text }
                })
                .collect();
            results.push(generated);
        }
        log::info!("Generated {} sequence(s) for {} prompt(s)", output.sequences.len(), batch.len());
        batch.rewrap(results)
    }
}
