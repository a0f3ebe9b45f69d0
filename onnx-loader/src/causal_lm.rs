//! Decoder-only language models driven one step at a time.

use std::sync::Arc;

use xmodal_values::{Tensor, TensorMap};

use crate::error::{OnnxError, Result};
use crate::session::InferenceSession;

/// Next-token logits for every row plus the updated decode cache.
#[derive(Debug, Clone)]
pub struct CausalLmOutput<C> {
    /// `[batch, vocab]` logits at the last position.
    pub logits: Tensor,
    pub cache: C,
}

/// A model the generation loop can step.
///
/// The cache is opaque to the loop: it is produced by `forward`, handed back
/// unchanged on the next call, and reordered when beams are reselected.
pub trait CausalLanguageModel {
    type Cache;

    /// Run one step.
    ///
    /// `input_ids` holds the tokens fed this step: the full prompt when
    /// `cache` is `None`, the last chosen token of each row afterwards.
    /// `attention_mask` always spans the whole history.
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        cache: Option<Self::Cache>,
    ) -> Result<CausalLmOutput<Self::Cache>>;

    /// Gather cache rows so row `i` of the result is row `beam_indices[i]` of the input.
    fn reorder_cache(&self, cache: Self::Cache, beam_indices: &[usize]) -> Result<Self::Cache>;
}

/// Decode cache of an ONNX decoder.
#[derive(Debug, Clone)]
pub enum DecoderCache {
    /// `past_key_values.{i}.key/value` tensors for the next step.
    PastKeyValues(TensorMap),
    /// Full token history for graphs without past inputs.
    History(Tensor),
}

/// ONNX decoder-only model (`input_ids`, `attention_mask` → `logits`).
///
/// When the graph declares `past_key_values.{i}.key/value` inputs the
/// `present.{i}.key/value` outputs are threaded back as the next step's
/// past. Otherwise the full history is re-fed every step.
pub struct OnnxCausalLm {
    session: Arc<dyn InferenceSession>,
    num_layers: usize,
    kv_shape: Option<(usize, usize)>,
    uses_position_ids: bool,
}

fn past_name(layer: usize, kind: &str) -> String {
    format!("past_key_values.{layer}.{kind}")
}

fn present_name(layer: usize, kind: &str) -> String {
    format!("present.{layer}.{kind}")
}

impl OnnxCausalLm {
    /// Inspects the session's inputs to find the cache layout.
    ///
    /// Head count and head size are read from the fixed dims of
    /// `past_key_values.0.key` (`[batch, kv_heads, past_len, head_dim]`).
    pub fn new(session: Arc<dyn InferenceSession>) -> Result<Self> {
        let num_layers = (0..)
            .take_while(|&i| session.has_input(&past_name(i, "key")))
            .count();
        let kv_shape = session
            .input_spec(&past_name(0, "key"))
            .and_then(|spec| Some((spec.fixed_dim(1)?, spec.fixed_dim(3)?)));
        if num_layers > 0 && kv_shape.is_none() {
            log::warn!("Cache head shape is symbolic; call with_kv_shape before generating");
        }
        let uses_position_ids = session.has_input("position_ids");
        log::info!(
            "Causal LM ready: {} cache layers, position_ids={}",
            num_layers,
            uses_position_ids
        );
        Ok(Self { session, num_layers, kv_shape, uses_position_ids })
    }

    /// Sets `(kv_heads, head_dim)` for graphs whose cache dims are symbolic.
    pub fn with_kv_shape(mut self, kv_heads: usize, head_dim: usize) -> Self {
        self.kv_shape = Some((kv_heads, head_dim));
        self
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn uses_past(&self) -> bool {
        self.num_layers > 0
    }

    fn empty_past(&self, batch: usize) -> Result<TensorMap> {
        let (heads, head_dim) = self.kv_shape.ok_or_else(|| {
            OnnxError::configuration("unknown cache shape: kv heads and head size must be set")
        })?;
        let mut past = TensorMap::new();
        for layer in 0..self.num_layers {
            for kind in ["key", "value"] {
                past.insert(past_name(layer, kind), Tensor::zeros_f32(vec![batch, heads, 0, head_dim]));
            }
        }
        Ok(past)
    }

    fn run(&self, mut inputs: TensorMap, input_ids: Tensor, attention_mask: &Tensor) -> Result<TensorMap> {
        let new_tokens = input_ids.dims().get(1).copied().unwrap_or(0);
        if self.uses_position_ids {
            inputs.insert("position_ids", position_ids(attention_mask, new_tokens)?);
        }
        inputs.insert("input_ids", input_ids);
        inputs.insert("attention_mask", attention_mask.clone());
        self.session.run(inputs)
    }
}

/// Positions from the attention mask: cumulative sum minus one, padding
/// positions set to 1, keeping the last `new_tokens` columns.
pub fn position_ids(attention_mask: &Tensor, new_tokens: usize) -> Result<Tensor> {
    let dims = attention_mask.dims();
    if dims.len() != 2 || new_tokens > dims[1] {
        return Err(OnnxError::InferenceFailed(format!(
            "cannot derive position ids for {new_tokens} tokens from mask {:?}",
            dims
        )));
    }
    let (batch, total) = (dims[0], dims[1]);
    let mask = attention_mask.to_i64_lossy();
    let mut out = Vec::with_capacity(batch * new_tokens);
    for row in mask.chunks(total) {
        let mut running = 0i64;
        let positions: Vec<i64> = row
            .iter()
            .map(|&m| {
                running += m;
                if m == 0 { 1 } else { running - 1 }
            })
            .collect();
        out.extend_from_slice(&positions[total - new_tokens..]);
    }
    Ok(Tensor::from_i64(out, vec![batch, new_tokens])?)
}

/// `[batch, vocab]` logits at the final position.
fn last_logits(logits: Tensor) -> Result<Tensor> {
    match logits.rank() {
        3 => Ok(logits.select(1, -1)?),
        2 => Ok(logits),
        _ => Err(OnnxError::InferenceFailed(format!(
            "unexpected logits shape {:?}",
            logits.dims()
        ))),
    }
}

fn take_output(outputs: &mut TensorMap, name: &str) -> Result<Tensor> {
    outputs
        .remove(name)
        .ok_or_else(|| OnnxError::MissingOutput { name: name.to_string() })
}

impl CausalLanguageModel for OnnxCausalLm {
    type Cache = DecoderCache;

    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        cache: Option<DecoderCache>,
    ) -> Result<CausalLmOutput<DecoderCache>> {
        let batch = input_ids.dims().first().copied().unwrap_or(0);

        if self.uses_past() {
            let past = match cache {
                Some(DecoderCache::PastKeyValues(past)) => past,
                None => self.empty_past(batch)?,
                Some(DecoderCache::History(_)) => {
                    return Err(OnnxError::configuration("history cache given to a model with past inputs"))
                }
            };
            let mut outputs = self.run(past, input_ids.clone(), attention_mask)?;
            let logits = last_logits(take_output(&mut outputs, "logits")?)?;

            let mut next = TensorMap::new();
            for layer in 0..self.num_layers {
                for kind in ["key", "value"] {
                    let present = take_output(&mut outputs, &present_name(layer, kind))?;
                    next.insert(past_name(layer, kind), present);
                }
            }
            return Ok(CausalLmOutput { logits, cache: DecoderCache::PastKeyValues(next) });
        }

        let history = match cache {
            Some(DecoderCache::History(previous)) => Tensor::concat(&[previous, input_ids.clone()], 1)?,
            None => input_ids.clone(),
            Some(DecoderCache::PastKeyValues(_)) => {
                return Err(OnnxError::configuration("past_key_values cache given to a model without past inputs"))
            }
        };
        let mut outputs = self.run(TensorMap::new(), history.clone(), attention_mask)?;
        let logits = last_logits(take_output(&mut outputs, "logits")?)?;
        Ok(CausalLmOutput { logits, cache: DecoderCache::History(history) })
    }

    fn reorder_cache(&self, cache: DecoderCache, beam_indices: &[usize]) -> Result<DecoderCache> {
        match cache {
            DecoderCache::PastKeyValues(past) => {
                let reordered = past
                    .into_iter()
                    .map(|(name, t)| Ok((name, t.index_select(0, beam_indices)?)))
                    .collect::<Result<TensorMap>>()?;
                Ok(DecoderCache::PastKeyValues(reordered))
            }
            DecoderCache::History(history) => Ok(DecoderCache::History(history.index_select(0, beam_indices)?)),
        }
    }
}
