//! Batched encoder output and the per-call options that shape it.

use serde::{Deserialize, Serialize};
use xmodal_values::{Tensor, TensorMap};

use crate::error::{Result, TokenizationError};

/// Which end of a row receives padding.
///
/// Generation pads on the left so the newest token of every row sits in the
/// last column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingSide {
    #[default]
    Right,
    Left,
}

/// Options for a single `encode` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub add_special_tokens: bool,
    /// Pad rows to the longest row. Without it, rows of different length are an error.
    pub padding: bool,
    pub truncation: bool,
    /// Truncation length; falls back to the tokenizer's `model_max_length`.
    pub max_length: Option<usize>,
    /// Overrides the tokenizer's default side for this call only.
    pub padding_side: Option<PaddingSide>,
    /// Pad every row to the truncation length instead of the longest row.
    pub pad_to_max_length: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            padding: true,
            truncation: false,
            max_length: None,
            padding_side: None,
            pad_to_max_length: false,
        }
    }
}

impl EncodeOptions {
    pub fn left_padded(mut self) -> Self {
        self.padding_side = Some(PaddingSide::Left);
        self
    }

    pub fn truncated(mut self, max_length: Option<usize>) -> Self {
        self.truncation = true;
        self.max_length = max_length;
        self
    }

    /// Fixed-width rows: truncate and pad to `max_length` (or the tokenizer's
    /// `model_max_length` when `None`).
    pub fn padded_to_max_length(mut self, max_length: Option<usize>) -> Self {
        self.padding = true;
        self.pad_to_max_length = true;
        self.truncated(max_length)
    }

    pub fn without_special_tokens(mut self) -> Self {
        self.add_special_tokens = false;
        self
    }
}

/// Rectangular `[batch, seq]` encoder output.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEncoding {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Option<Tensor>,
}

impl BatchEncoding {
    /// Pads ragged rows into int64 tensors.
    ///
    /// Padding positions get `pad_id` in `input_ids`, 0 in the mask and 0 in
    /// the type ids.
    pub fn from_rows(
        rows: Vec<Vec<i64>>,
        type_ids: Option<Vec<Vec<i64>>>,
        pad_id: i64,
        side: PaddingSide,
        padding: bool,
    ) -> Result<Self> {
        Self::from_rows_with_width(rows, type_ids, pad_id, side, padding, 0)
    }

    /// Like [`from_rows`](Self::from_rows) but pads to at least `min_width` columns.
    pub fn from_rows_with_width(
        rows: Vec<Vec<i64>>,
        type_ids: Option<Vec<Vec<i64>>>,
        pad_id: i64,
        side: PaddingSide,
        padding: bool,
        min_width: usize,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(TokenizationError::InvalidInput("cannot encode an empty batch".into()));
        }
        let longest = rows.iter().map(Vec::len).max().unwrap_or(0);
        let width = if padding { longest.max(min_width) } else { longest };
        if !padding && rows.iter().any(|r| r.len() != width) {
            return Err(TokenizationError::InvalidInput(
                "rows have different lengths and padding is disabled".into(),
            ));
        }

        let batch = rows.len();
        let mut ids = Vec::with_capacity(batch * width);
        let mut mask = Vec::with_capacity(batch * width);
        let mut types = type_ids.as_ref().map(|_| Vec::with_capacity(batch * width));

        for (i, row) in rows.iter().enumerate() {
            let pad = width - row.len();
            let row_types = type_ids.as_ref().and_then(|t| t.get(i));
            if side == PaddingSide::Left {
                push_padding(&mut ids, &mut mask, types.as_mut(), pad, pad_id);
            }
            ids.extend_from_slice(row);
            mask.extend(std::iter::repeat(1).take(row.len()));
            if let Some(types) = types.as_mut() {
                match row_types {
                    Some(t) if t.len() == row.len() => types.extend_from_slice(t),
                    _ => types.extend(std::iter::repeat(0).take(row.len())),
                }
            }
            if side == PaddingSide::Right {
                push_padding(&mut ids, &mut mask, types.as_mut(), pad, pad_id);
            }
        }

        let dims = vec![batch, width];
        Ok(Self {
            input_ids: Tensor::from_i64(ids, dims.clone())?,
            attention_mask: Tensor::from_i64(mask, dims.clone())?,
            token_type_ids: types.map(|t| Tensor::from_i64(t, dims)).transpose()?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }

    /// Token ids of one row, padding included.
    pub fn row_ids(&self, row: usize) -> Result<&[i64]> {
        Self::row_of(&self.input_ids, row, self.seq_len())
    }

    pub fn row_mask(&self, row: usize) -> Result<&[i64]> {
        Self::row_of(&self.attention_mask, row, self.seq_len())
    }

    fn row_of(tensor: &Tensor, row: usize, width: usize) -> Result<&[i64]> {
        let data = tensor.as_i64()?;
        data.get(row * width..(row + 1) * width)
            .ok_or_else(|| TokenizationError::InvalidInput(format!("row {row} out of range")))
    }

    /// Model inputs named the way transformer graphs expect them.
    pub fn into_tensor_map(self) -> TensorMap {
        let mut map = TensorMap::new()
            .with("input_ids", self.input_ids)
            .with("attention_mask", self.attention_mask);
        if let Some(types) = self.token_type_ids {
            map.insert("token_type_ids", types);
        }
        map
    }
}

fn push_padding(ids: &mut Vec<i64>, mask: &mut Vec<i64>, types: Option<&mut Vec<i64>>, n: usize, pad_id: i64) {
    ids.extend(std::iter::repeat(pad_id).take(n));
    mask.extend(std::iter::repeat(0).take(n));
    if let Some(types) = types {
        types.extend(std::iter::repeat(0).take(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_padding_keeps_last_token_aligned() {
        let enc = BatchEncoding::from_rows(
            vec![vec![5, 6, 7], vec![8]],
            None,
            0,
            PaddingSide::Left,
            true,
        )
        .unwrap();
        assert_eq!(enc.input_ids.as_i64().unwrap(), &[5, 6, 7, 0, 0, 8]);
        assert_eq!(enc.attention_mask.as_i64().unwrap(), &[1, 1, 1, 0, 0, 1]);
    }

    #[test]
    fn test_right_padding_with_type_ids() {
        let enc = BatchEncoding::from_rows(
            vec![vec![1, 2], vec![3, 4, 5]],
            Some(vec![vec![0, 1], vec![0, 1, 1]]),
            9,
            PaddingSide::Right,
            true,
        )
        .unwrap();
        assert_eq!(enc.row_ids(0).unwrap(), &[1, 2, 9]);
        assert_eq!(enc.row_mask(0).unwrap(), &[1, 1, 0]);
        assert_eq!(enc.token_type_ids.unwrap().as_i64().unwrap(), &[0, 1, 0, 0, 1, 1]);
    }

    #[test]
    fn test_ragged_rows_without_padding_fail() {
        let err = BatchEncoding::from_rows(vec![vec![1], vec![1, 2]], None, 0, PaddingSide::Right, false);
        assert!(matches!(err, Err(TokenizationError::InvalidInput(_))));
    }

    #[test]
    fn test_min_width_pads_past_longest_row() {
        let enc = BatchEncoding::from_rows_with_width(vec![vec![4, 5]], None, 0, PaddingSide::Right, true, 4).unwrap();
        assert_eq!(enc.input_ids.as_i64().unwrap(), &[4, 5, 0, 0]);
        assert_eq!(enc.seq_len(), 4);
    }
}
