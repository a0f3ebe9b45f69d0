//! Conversion between [`xmodal_values::Tensor`] and ONNX Runtime values.

use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor as OrtTensor};
use xmodal_values::{Tensor, TensorData, TensorDataType};

use crate::error::{OnnxError, Result};

pub(crate) fn dtype_from_ort(ty: TensorElementType) -> Option<TensorDataType> {
    match ty {
        TensorElementType::Float32 => Some(TensorDataType::Float32),
        TensorElementType::Int64 => Some(TensorDataType::Int64),
        TensorElementType::Int32 => Some(TensorDataType::Int32),
        TensorElementType::Int8 => Some(TensorDataType::Int8),
        TensorElementType::Uint8 => Some(TensorDataType::Uint8),
        TensorElementType::Bool => Some(TensorDataType::Bool),
        _ => None,
    }
}

fn ort_err(context: &str) -> impl Fn(ort::Error) -> OnnxError + '_ {
    move |e| OnnxError::InferenceFailed(format!("{context}: {e}"))
}

/// Builds an owned ORT value. Float and int64 tensors go through `ndarray`.
pub(crate) fn to_ort(tensor: &Tensor) -> Result<DynValue> {
    let shape: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
    let err = ort_err("Failed to create input tensor");
    let value = match tensor.data() {
        TensorData::F32(_) => OrtTensor::from_array(tensor.to_ndarray_f32()?).map_err(&err)?.into_dyn(),
        TensorData::I64(_) => OrtTensor::from_array(tensor.to_ndarray_i64()?).map_err(&err)?.into_dyn(),
        TensorData::I32(v) => OrtTensor::from_array((shape, v.clone())).map_err(&err)?.into_dyn(),
        TensorData::I8(v) => OrtTensor::from_array((shape, v.clone())).map_err(&err)?.into_dyn(),
        TensorData::U8(v) => OrtTensor::from_array((shape, v.clone())).map_err(&err)?.into_dyn(),
        TensorData::Bool(v) => OrtTensor::from_array((shape, v.clone())).map_err(&err)?.into_dyn(),
    };
    Ok(value)
}

fn dims_of(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}

/// Copies an ORT output into an owned tensor.
pub(crate) fn from_ort(name: &str, value: &DynValue) -> Result<Tensor> {
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok(Tensor::from_f32(data.to_vec(), dims_of(shape))?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
        return Ok(Tensor::from_i64(data.to_vec(), dims_of(shape))?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
        return Ok(Tensor::new(TensorData::I32(data.to_vec()), dims_of(shape))?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<u8>() {
        return Ok(Tensor::new(TensorData::U8(data.to_vec()), dims_of(shape))?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<i8>() {
        return Ok(Tensor::new(TensorData::I8(data.to_vec()), dims_of(shape))?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<bool>() {
        return Ok(Tensor::new(TensorData::Bool(data.to_vec()), dims_of(shape))?);
    }
    Err(OnnxError::UnsupportedType(format!("output '{name}' has an element type this crate does not read")))
}

/// Casts `tensor` to the element type the graph declares for it.
pub fn coerce(tensor: Tensor, expected: Option<TensorDataType>) -> Result<Tensor> {
    let Some(expected) = expected else {
        return Ok(tensor);
    };
    if tensor.dtype() == expected {
        return Ok(tensor);
    }
    let dims = tensor.dims().to_vec();
    let data = match expected {
        TensorDataType::Float32 => TensorData::F32(tensor.to_f32_lossy()),
        TensorDataType::Int64 => TensorData::I64(tensor.to_i64_lossy()),
        TensorDataType::Int32 => TensorData::I32(tensor.to_i64_lossy().into_iter().map(|x| x as i32).collect()),
        TensorDataType::Int8 => TensorData::I8(tensor.to_i64_lossy().into_iter().map(|x| x as i8).collect()),
        TensorDataType::Uint8 => TensorData::U8(tensor.to_i64_lossy().into_iter().map(|x| x as u8).collect()),
        TensorDataType::Bool => TensorData::Bool(tensor.to_f32_lossy().into_iter().map(|x| x != 0.0).collect()),
    };
    log::trace!("Coerced {} tensor {:?} to {}", tensor.dtype(), dims, expected);
    Ok(Tensor::new(data, dims)?)
}
