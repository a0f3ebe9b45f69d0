//! Owned n-dimensional tensors.
//!
//! A [`Tensor`] is a flat, row-major buffer plus its shape. The buffer is one
//! of the element types in [`TensorData`]; `product(dims) == buffer length`
//! holds for every tensor that can be constructed.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{ValueError, ValueResult};
use crate::types::TensorDataType;

/// Typed flat buffer backing a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

/// Applies the same expression to whichever buffer variant is present and
/// rewraps the result in that variant.
macro_rules! map_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::F32($v) => TensorData::F32($body),
            TensorData::I64($v) => TensorData::I64($body),
            TensorData::I32($v) => TensorData::I32($body),
            TensorData::I8($v) => TensorData::I8($body),
            TensorData::U8($v) => TensorData::U8($body),
            TensorData::Bool($v) => TensorData::Bool($body),
        }
    };
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> TensorDataType {
        match self {
            Self::F32(_) => TensorDataType::Float32,
            Self::I64(_) => TensorDataType::Int64,
            Self::I32(_) => TensorDataType::Int32,
            Self::I8(_) => TensorDataType::Int8,
            Self::U8(_) => TensorDataType::Uint8,
            Self::Bool(_) => TensorDataType::Bool,
        }
    }

    /// Copies the given element ranges, in order, into a new buffer.
    fn gather(&self, ranges: &[Range<usize>]) -> TensorData {
        map_data!(self, v => {
            let mut out = Vec::with_capacity(ranges.iter().map(|r| r.len()).sum());
            for r in ranges {
                out.extend_from_slice(&v[r.clone()]);
            }
            out
        })
    }

    fn empty_like(&self, capacity: usize) -> TensorData {
        map_data!(self, _v => Vec::with_capacity(capacity))
    }

    fn extend_from(&mut self, other: &TensorData, range: Range<usize>) -> ValueResult<()> {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.extend_from_slice(&b[range]),
            (Self::I64(a), Self::I64(b)) => a.extend_from_slice(&b[range]),
            (Self::I32(a), Self::I32(b)) => a.extend_from_slice(&b[range]),
            (Self::I8(a), Self::I8(b)) => a.extend_from_slice(&b[range]),
            (Self::U8(a), Self::U8(b)) => a.extend_from_slice(&b[range]),
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(&b[range]),
            (a, b) => {
                return Err(ValueError::TypeMismatch {
                    expected: a.dtype(),
                    actual: b.dtype(),
                })
            }
        }
        Ok(())
    }
}

/// Owned tensor: typed flat buffer and row-major shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr", into = "TensorRepr")]
pub struct Tensor {
    data: TensorData,
    dims: Vec<usize>,
}

impl Tensor {
    /// Builds a tensor, rejecting buffers whose length disagrees with `dims`.
    pub fn new(data: TensorData, dims: Vec<usize>) -> ValueResult<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(ValueError::ShapeMismatch {
                dims,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, dims })
    }

    pub fn from_f32(data: Vec<f32>, dims: Vec<usize>) -> ValueResult<Self> {
        Self::new(TensorData::F32(data), dims)
    }

    pub fn from_i64(data: Vec<i64>, dims: Vec<usize>) -> ValueResult<Self> {
        Self::new(TensorData::I64(data), dims)
    }

    pub fn from_u8(data: Vec<u8>, dims: Vec<usize>) -> ValueResult<Self> {
        Self::new(TensorData::U8(data), dims)
    }

    /// Tensor of the given shape with every element set to `value`.
    pub fn full_f32(value: f32, dims: Vec<usize>) -> Self {
        let n = dims.iter().product();
        Self { data: TensorData::F32(vec![value; n]), dims }
    }

    pub fn full_i64(value: i64, dims: Vec<usize>) -> Self {
        let n = dims.iter().product();
        Self { data: TensorData::I64(vec![value; n]), dims }
    }

    pub fn zeros_f32(dims: Vec<usize>) -> Self {
        Self::full_f32(0.0, dims)
    }

    pub fn ones_i64(dims: Vec<usize>) -> Self {
        Self::full_i64(1, dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dtype(&self) -> TensorDataType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32(&self) -> ValueResult<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Ok(v),
            other => Err(ValueError::TypeMismatch {
                expected: TensorDataType::Float32,
                actual: other.dtype(),
            }),
        }
    }

    pub fn as_f32_mut(&mut self) -> ValueResult<&mut [f32]> {
        match &mut self.data {
            TensorData::F32(v) => Ok(v),
            other => Err(ValueError::TypeMismatch {
                expected: TensorDataType::Float32,
                actual: other.dtype(),
            }),
        }
    }

    pub fn as_i64(&self) -> ValueResult<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Ok(v),
            other => Err(ValueError::TypeMismatch {
                expected: TensorDataType::Int64,
                actual: other.dtype(),
            }),
        }
    }

    /// Converts any numeric buffer to `f32`. Booleans map to 0.0 / 1.0.
    pub fn to_f32_lossy(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::I64(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I8(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::U8(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Converts any buffer to `i64`. Floats are truncated toward zero.
    pub fn to_i64_lossy(&self) -> Vec<i64> {
        match &self.data {
            TensorData::F32(v) => v.iter().map(|&x| x as i64).collect(),
            TensorData::I64(v) => v.clone(),
            TensorData::I32(v) => v.iter().map(|&x| x as i64).collect(),
            TensorData::I8(v) => v.iter().map(|&x| x as i64).collect(),
            TensorData::U8(v) => v.iter().map(|&x| x as i64).collect(),
            TensorData::Bool(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }

    /// Same buffer viewed under a new shape with the same element count.
    pub fn reshape(self, dims: Vec<usize>) -> ValueResult<Self> {
        Self::new(self.data, dims)
    }

    fn check_axis(&self, axis: usize) -> ValueResult<()> {
        if axis >= self.dims.len() {
            return Err(ValueError::InvalidAxis { axis, rank: self.dims.len() });
        }
        Ok(())
    }

    fn resolve_index(&self, axis: usize, index: isize) -> ValueResult<usize> {
        let size = self.dims[axis];
        let resolved = if index < 0 { size as isize + index } else { index };
        if resolved < 0 || resolved as usize >= size {
            return Err(ValueError::IndexOutOfBounds { axis, index, size });
        }
        Ok(resolved as usize)
    }

    /// (outer, axis length, inner) element counts around `axis`.
    fn split_at_axis(&self, axis: usize) -> (usize, usize, usize) {
        let outer = self.dims[..axis].iter().product();
        let inner = self.dims[axis + 1..].iter().product();
        (outer, self.dims[axis], inner)
    }

    /// Picks one position along `axis` and drops that axis.
    /// Negative indices count from the end.
    pub fn select(&self, axis: usize, index: isize) -> ValueResult<Tensor> {
        self.check_axis(axis)?;
        let index = self.resolve_index(axis, index)?;
        let (outer, size, inner) = self.split_at_axis(axis);
        let ranges: Vec<_> = (0..outer)
            .map(|o| {
                let start = (o * size + index) * inner;
                start..start + inner
            })
            .collect();
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Ok(Tensor { data: self.data.gather(&ranges), dims })
    }

    /// `select(0, i)`: the i-th item of the leading (batch) axis.
    pub fn index(&self, i: usize) -> ValueResult<Tensor> {
        self.select(0, i as isize)
    }

    /// Gathers the given positions along `axis`, keeping the axis.
    /// Indices may repeat, which is how batch rows are expanded or reordered.
    pub fn index_select(&self, axis: usize, indices: &[usize]) -> ValueResult<Tensor> {
        self.check_axis(axis)?;
        let (outer, size, inner) = self.split_at_axis(axis);
        for &i in indices {
            if i >= size {
                return Err(ValueError::IndexOutOfBounds { axis, index: i as isize, size });
            }
        }
        let mut ranges = Vec::with_capacity(outer * indices.len());
        for o in 0..outer {
            for &i in indices {
                let start = (o * size + i) * inner;
                ranges.push(start..start + inner);
            }
        }
        let mut dims = self.dims.clone();
        dims[axis] = indices.len();
        Ok(Tensor { data: self.data.gather(&ranges), dims })
    }

    /// Joins tensors along `axis`. All other dimensions and the dtype must agree.
    pub fn concat(tensors: &[Tensor], axis: usize) -> ValueResult<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| ValueError::invalid("cannot concatenate an empty list of tensors"))?;
        first.check_axis(axis)?;
        for t in &tensors[1..] {
            let same_rank = t.dims.len() == first.dims.len();
            let same_other_dims = same_rank
                && t.dims
                    .iter()
                    .zip(&first.dims)
                    .enumerate()
                    .all(|(d, (a, b))| d == axis || a == b);
            if !same_other_dims {
                return Err(ValueError::invalid(format!(
                    "cannot concatenate {:?} with {:?} along axis {axis}",
                    first.dims, t.dims
                )));
            }
        }

        let outer: usize = first.dims[..axis].iter().product();
        let inner: usize = first.dims[axis + 1..].iter().product();
        let total: usize = tensors.iter().map(|t| t.len()).sum();
        let mut data = first.data.empty_like(total);
        for o in 0..outer {
            for t in tensors {
                let chunk = t.dims[axis] * inner;
                data.extend_from(&t.data, o * chunk..(o + 1) * chunk)?;
            }
        }

        let mut dims = first.dims.clone();
        dims[axis] = tensors.iter().map(|t| t.dims[axis]).sum();
        Tensor::new(data, dims)
    }

    /// Largest element of a float tensor, `None` when empty.
    pub fn max_f32(&self) -> ValueResult<Option<f32>> {
        Ok(self.as_f32()?.iter().copied().reduce(f32::max))
    }

    /// Splits a float tensor into rows of its last axis.
    pub fn rows_f32(&self) -> ValueResult<std::slice::Chunks<'_, f32>> {
        let width = self.dims.last().copied().unwrap_or(1).max(1);
        Ok(self.as_f32()?.chunks(width))
    }

    /// Converts to an `ndarray` array of the same shape.
    #[cfg(feature = "ndarray")]
    pub fn to_ndarray_f32(&self) -> ValueResult<ndarray::ArrayD<f32>> {
        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.dims), self.as_f32()?.to_vec())
            .map_err(|e| ValueError::invalid(e.to_string()))
    }

    #[cfg(feature = "ndarray")]
    pub fn to_ndarray_i64(&self) -> ValueResult<ndarray::ArrayD<i64>> {
        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&self.dims), self.as_i64()?.to_vec())
            .map_err(|e| ValueError::invalid(e.to_string()))
    }
}

#[cfg(feature = "ndarray")]
impl From<ndarray::ArrayD<f32>> for Tensor {
    fn from(array: ndarray::ArrayD<f32>) -> Self {
        let dims = array.shape().to_vec();
        Tensor { data: TensorData::F32(array.iter().copied().collect()), dims }
    }
}

#[cfg(feature = "ndarray")]
impl From<ndarray::ArrayD<i64>> for Tensor {
    fn from(array: ndarray::ArrayD<i64>) -> Self {
        let dims = array.shape().to_vec();
        Tensor { data: TensorData::I64(array.iter().copied().collect()), dims }
    }
}

/// Wire form: `{ "type": "float32", "dims": [2, 2], "data": [..] }`.
#[derive(Serialize, Deserialize)]
struct TensorRepr {
    #[serde(rename = "type")]
    dtype: TensorDataType,
    dims: Vec<usize>,
    data: serde_json::Value,
}

impl From<Tensor> for TensorRepr {
    fn from(tensor: Tensor) -> Self {
        let dtype = tensor.dtype();
        let data = match tensor.data {
            TensorData::F32(v) => v.into_iter().map(serde_json::Value::from).collect(),
            TensorData::I64(v) => v.into_iter().map(serde_json::Value::from).collect(),
            TensorData::I32(v) => v.into_iter().map(serde_json::Value::from).collect(),
            TensorData::I8(v) => v.into_iter().map(serde_json::Value::from).collect(),
            TensorData::U8(v) => v.into_iter().map(serde_json::Value::from).collect(),
            TensorData::Bool(v) => v.into_iter().map(serde_json::Value::from).collect(),
        };
        TensorRepr { dtype, dims: tensor.dims, data }
    }
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = ValueError;

    fn try_from(repr: TensorRepr) -> Result<Self, Self::Error> {
        fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> ValueResult<Vec<T>> {
            serde_json::from_value(value).map_err(|e| ValueError::invalid(e.to_string()))
        }
        let data = match repr.dtype {
            TensorDataType::Float32 => TensorData::F32(parse(repr.data)?),
            TensorDataType::Int64 => TensorData::I64(parse(repr.data)?),
            TensorDataType::Int32 => TensorData::I32(parse(repr.data)?),
            TensorDataType::Int8 => TensorData::I8(parse(repr.data)?),
            TensorDataType::Uint8 => TensorData::U8(parse(repr.data)?),
            TensorDataType::Bool => TensorData::Bool(parse(repr.data)?),
        };
        Tensor::new(data, repr.dims)
    }
}
