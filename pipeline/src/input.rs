//! Input normalization.
//!
//! Every handler first turns its call arguments into a [`Batch`]: an ordered
//! list of items plus whether the caller passed an array. Outputs are
//! re-wrapped with [`Batch::rewrap`], so a length-1 array stays an array and
//! only a bare scalar is unwrapped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xmodal_tokenization::ChatMessage;

use crate::error::{PipelineError, Result};
use crate::media::{RawAudio, RawImage};
use crate::types::PipelineType;

/// Typed call argument: one item or an explicit array of items.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineInput<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> From<T> for PipelineInput<T> {
    fn from(item: T) -> Self {
        Self::Single(item)
    }
}

impl<T> From<Vec<T>> for PipelineInput<T> {
    fn from(items: Vec<T>) -> Self {
        Self::Batch(items)
    }
}

/// Handler result before serialization; mirrors the shape of the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> Output<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Single(item) => vec![item],
            Self::Batch(items) => items,
        }
    }
}

/// Normalized input: ordered items and the remembered batching flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    items: Vec<T>,
    was_batched: bool,
}

impl<T> Batch<T> {
    pub fn new(input: PipelineInput<T>) -> Result<Self> {
        let (items, was_batched) = match input {
            PipelineInput::Single(item) => (vec![item], false),
            PipelineInput::Batch(items) => (items, true),
        };
        if items.is_empty() {
            return Err(PipelineError::input_shape("received an empty batch"));
        }
        Ok(Self { items, was_batched })
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn was_batched(&self) -> bool {
        self.was_batched
    }

    /// Fails instead of truncating when the batch is larger than `limit`.
    pub fn ensure_ceiling(&self, limit: usize, task: PipelineType) -> Result<()> {
        if self.items.len() > limit {
            return Err(PipelineError::InputShape(format!(
                "{task} supports a batch size of at most {limit}, got {}",
                self.items.len()
            )));
        }
        Ok(())
    }

    /// Same batching flag, new items. Used when items are resolved (URL to pixels).
    pub fn map_items<U>(self, f: impl FnMut(T) -> Result<U>) -> Result<Batch<U>> {
        let items = self.items.into_iter().map(f).collect::<Result<Vec<_>>>()?;
        Ok(Batch { items, was_batched: self.was_batched })
    }

    /// Wraps one output per item back into the caller's shape.
    pub fn rewrap<U>(&self, outputs: Vec<U>) -> Result<Output<U>> {
        if outputs.len() != self.items.len() {
            return Err(PipelineError::InputShape(format!(
                "produced {} outputs for {} inputs",
                outputs.len(),
                self.items.len()
            )));
        }
        if self.was_batched {
            return Ok(Output::Batch(outputs));
        }
        let mut outputs = outputs;
        match outputs.pop() {
            Some(only) => Ok(Output::Single(only)),
            None => Err(PipelineError::input_shape("no output produced")),
        }
    }
}

impl<T: InputItem> Batch<T> {
    /// Normalizes a JSON call argument.
    pub fn from_json(value: &Value) -> Result<Self> {
        let input = if T::is_batch(value) {
            let Value::Array(elements) = value else {
                return Err(PipelineError::input_shape("expected an array"));
            };
            PipelineInput::Batch(elements.iter().map(T::from_value).collect::<Result<Vec<_>>>()?)
        } else {
            PipelineInput::Single(T::from_value(value)?)
        };
        let batch = Self::new(input)?;
        T::validate_batch(&batch.items)?;
        Ok(batch)
    }
}

/// A scalar input kind a handler accepts.
pub trait InputItem: Sized {
    fn from_value(value: &Value) -> Result<Self>;

    /// Whether `value` is an array of items rather than one item.
    fn is_batch(value: &Value) -> bool {
        value.is_array()
    }

    fn validate_batch(_items: &[Self]) -> Result<()> {
        Ok(())
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl InputItem for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::InputShape(format!("expected a string, got {}", describe(value))))
    }
}

/// Prompt for text generation: plain text or a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    Text(String),
    Chat(Vec<ChatMessage>),
}

impl TextInput {
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat(_))
    }
}

fn is_message(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("role") && o.contains_key("content"))
}

impl InputItem for TextInput {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Array(turns) if !turns.is_empty() && turns.iter().all(is_message) => {
                Ok(Self::Chat(serde_json::from_value(value.clone())?))
            }
            other => Err(PipelineError::InputShape(format!(
                "expected a string or a chat (array of {{role, content}}), got {}",
                describe(other)
            ))),
        }
    }

    /// An array of messages is one chat; any other array is a batch.
    fn is_batch(value: &Value) -> bool {
        match value {
            Value::Array(elements) => !elements.first().is_some_and(Value::is_object),
            _ => false,
        }
    }

    fn validate_batch(items: &[Self]) -> Result<()> {
        let chats = items.iter().filter(|i| i.is_chat()).count();
        if chats != 0 && chats != items.len() {
            return Err(PipelineError::input_shape("a batch cannot mix chats and plain strings"));
        }
        Ok(())
    }
}

/// Image argument: a URL/path for the resource loader, or decoded pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageInput {
    Url(String),
    Raw(RawImage),
}

impl InputItem for ImageInput {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(url) => Ok(Self::Url(url.clone())),
            Value::Object(_) => Ok(Self::Raw(serde_json::from_value::<RawImage>(value.clone())?.validated()?)),
            other => Err(PipelineError::InputShape(format!(
                "expected an image URL or raw image, got {}",
                describe(other)
            ))),
        }
    }
}

/// Audio argument: a URL/path, bare samples, or samples with their rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudioInput {
    Url(String),
    Samples(Vec<f32>),
    Raw(RawAudio),
}

impl InputItem for AudioInput {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(url) => Ok(Self::Url(url.clone())),
            Value::Array(_) => Ok(Self::Samples(serde_json::from_value(value.clone())?)),
            Value::Object(_) => Ok(Self::Raw(serde_json::from_value(value.clone())?)),
            other => Err(PipelineError::InputShape(format!(
                "expected an audio URL or samples, got {}",
                describe(other)
            ))),
        }
    }

    /// A flat array of numbers is one waveform.
    fn is_batch(value: &Value) -> bool {
        match value {
            Value::Array(elements) => !elements.first().is_some_and(Value::is_number),
            _ => false,
        }
    }
}

/// Question, with its context when given inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaInput {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl QaInput {
    pub fn new(question: impl Into<String>, context: impl Into<String>) -> Self {
        Self { question: question.into(), context: Some(context.into()) }
    }
}

impl InputItem for QaInput {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(q) => Ok(Self { question: q.clone(), context: None }),
            Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
            other => Err(PipelineError::InputShape(format!(
                "expected a question string or {{question, context}}, got {}",
                describe(other)
            ))),
        }
    }
}
