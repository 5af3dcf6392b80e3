use crate::{
    QuantError, QuantScheme, decode, deinterleave, encode, interleave, pack, propagate_layout,
    restore_layout, unpack_codes,
};
use serde::{Deserialize, Serialize};

/// Logical quantized weight matrix of shape `rows x cols` (`N x K` for an `nt` matmul).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedWeight {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns, the reduction dimension.
    pub cols: usize,
    /// Row-major values, inside the scheme's value range.
    pub values: Vec<i16>,
}

impl QuantizedWeight {
    /// Create a weight matrix, checking the buffer size.
    pub fn new(rows: usize, cols: usize, values: Vec<i16>) -> Result<Self, QuantError> {
        if values.len() != rows * cols {
            return Err(QuantError::ShapeMismatch {
                expected: rows * cols,
                actual: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }
}

/// Packed weight bytes ready to be handed to a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedWeight {
    /// Number of logical rows.
    pub rows: usize,
    /// Number of logical columns.
    pub cols: usize,
    /// Packed storage bytes, `rows * packed_row_bytes` long.
    pub bytes: Vec<u8>,
}

/// The weight transform applied before invoking a quantized matmul kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, new)]
pub struct WeightTransform {
    /// Packing scheme.
    pub scheme: QuantScheme,
    /// Whether 16x16 tiles are reordered into fragment load order.
    pub propagate_layout: bool,
}

impl WeightTransform {
    /// Reorder, encode and pack a weight matrix.
    pub fn permute_and_pack(&self, weight: &QuantizedWeight) -> Result<PackedWeight, QuantError> {
        let codes = encode(&weight.values, &self.scheme)?;
        let codes = match self.propagate_layout {
            true => propagate_layout(&codes, weight.rows, weight.cols)?,
            false => codes,
        };
        let bytes = pack(&codes, weight.cols, &self.scheme)?;
        let bytes = match self.scheme.fast_decoding {
            true => interleave(&bytes, weight.cols, &self.scheme)?,
            false => bytes,
        };

        log::trace!(
            "Packed {}x{} weight into {} bytes with {:?}",
            weight.rows,
            weight.cols,
            bytes.len(),
            self
        );

        Ok(PackedWeight {
            rows: weight.rows,
            cols: weight.cols,
            bytes,
        })
    }

    /// Inverse of [WeightTransform::permute_and_pack].
    pub fn unpack(&self, packed: &PackedWeight) -> Result<QuantizedWeight, QuantError> {
        let bytes = match self.scheme.fast_decoding {
            true => deinterleave(&packed.bytes, packed.cols, &self.scheme)?,
            false => packed.bytes.clone(),
        };
        let codes = unpack_codes(&bytes, packed.cols, &self.scheme)?;
        let codes = match self.propagate_layout {
            true => restore_layout(&codes, packed.rows, packed.cols)?,
            false => codes,
        };

        QuantizedWeight::new(packed.rows, packed.cols, decode(&codes, &self.scheme))
    }
}

/// Reorder, encode and pack a weight matrix with the given transform.
pub fn permute_and_pack(
    weight: &QuantizedWeight,
    transform: &WeightTransform,
) -> Result<PackedWeight, QuantError> {
    transform.permute_and_pack(weight)
}

/// Recover the logical weight matrix from packed bytes.
pub fn unpack(
    packed: &PackedWeight,
    transform: &WeightTransform,
) -> Result<QuantizedWeight, QuantError> {
    transform.unpack(packed)
}
