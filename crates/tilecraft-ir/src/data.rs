use bytemuck::Pod;
use half::f16;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ElemType, TensorDesc};

/// Errors when reading tensor data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// The buffer length doesn't match the descriptor.
    #[error("Tensor {desc} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Descriptor of the tensor.
        desc: TensorDesc,
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },
    /// The data can't be read as floats.
    #[error("Can't read {dtype} data as floats")]
    NotFloat {
        /// Element type of the tensor.
        dtype: ElemType,
    },
}

/// Host-side tensor contents: a descriptor plus raw little-endian bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Shape and type of the tensor.
    pub desc: TensorDesc,
    /// Raw bytes, `desc.size_bytes()` long.
    pub bytes: Vec<u8>,
}

impl TensorData {
    /// Create tensor data from raw bytes.
    pub fn new(desc: TensorDesc, bytes: Vec<u8>) -> Result<Self, DataError> {
        let expected = desc.size_bytes();
        if bytes.len() != expected {
            return Err(DataError::SizeMismatch {
                desc,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { desc, bytes })
    }

    /// Zero-filled tensor data.
    pub fn zeros(desc: TensorDesc) -> Self {
        let bytes = vec![0; desc.size_bytes()];
        Self { desc, bytes }
    }

    /// Tensor data from plain values.
    pub fn from_values<E: Pod>(
        shape: impl Into<Vec<usize>>,
        dtype: ElemType,
        values: &[E],
    ) -> Result<Self, DataError> {
        let desc = TensorDesc::new(shape, dtype);
        Self::new(desc, bytemuck::cast_slice(values).to_vec())
    }

    /// `f32` tensor data.
    pub fn from_f32(shape: impl Into<Vec<usize>>, values: &[f32]) -> Result<Self, DataError> {
        Self::from_values(shape, ElemType::F32, values)
    }

    /// `f16` tensor data, converted from `f32` values.
    pub fn from_f16(shape: impl Into<Vec<usize>>, values: &[f32]) -> Result<Self, DataError> {
        let values: Vec<f16> = values.iter().map(|v| f16::from_f32(*v)).collect();
        Self::from_values(shape, ElemType::F16, &values)
    }

    /// Read the values as `f32`, converting from half precision when needed.
    pub fn to_f32(&self) -> Result<Vec<f32>, DataError> {
        match self.desc.dtype {
            ElemType::F32 => Ok(self
                .bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            ElemType::F16 => Ok(self
                .bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            ElemType::BF16 => Ok(self
                .bytes
                .chunks_exact(2)
                .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            dtype => Err(DataError::NotFloat { dtype }),
        }
    }
}
