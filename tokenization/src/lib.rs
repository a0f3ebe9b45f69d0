//! Text tokenization for the xmodal pipelines.
//!
//! [`TextTokenizer`] is the seam task handlers talk to; [`HfTokenizer`] wraps
//! HuggingFace's fast tokenizers. Padding side is an encode option rather
//! than tokenizer state, so one tokenizer can serve generation (left) and
//! classification (right) concurrently.

pub mod chat;
pub mod encoding;
pub mod error;
pub mod hf;

pub use chat::{ChatMessage, ChatTemplate};
pub use encoding::{BatchEncoding, EncodeOptions, PaddingSide};
pub use error::{Result, TokenizationError};
pub use hf::{HfTokenizer, TokenizerConfig};

/// Converts text to token id tensors and back.
pub trait TextTokenizer: Send + Sync {
    /// Encode a batch of texts into a padded `[batch, seq]` encoding.
    fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<BatchEncoding>;

    /// Encode `(text, text_pair)` pairs, e.g. question and context.
    fn encode_pairs(&self, pairs: &[(String, String)], options: &EncodeOptions) -> Result<BatchEncoding>;

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String>;

    fn decode_batch(&self, sequences: &[Vec<i64>], skip_special_tokens: bool) -> Result<Vec<String>> {
        sequences.iter().map(|s| self.decode(s, skip_special_tokens)).collect()
    }

    fn mask_token(&self) -> Option<&str>;
    fn mask_token_id(&self) -> Option<i64>;
    fn sep_token_id(&self) -> Option<i64>;
    fn eos_token_id(&self) -> Option<i64>;
    fn pad_token_id(&self) -> Option<i64>;

    /// Ids of every token flagged special.
    fn all_special_ids(&self) -> &[i64];

    /// Side used when [`EncodeOptions::padding_side`] is unset.
    fn padding_side(&self) -> PaddingSide;

    /// Render a conversation into a prompt string.
    fn apply_chat_template(&self, messages: &[ChatMessage], add_generation_prompt: bool) -> Result<String>;
}
