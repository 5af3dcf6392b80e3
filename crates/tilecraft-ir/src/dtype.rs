use core::fmt::Display;
use serde::{Deserialize, Serialize};
use tilecraft_quant::QuantStore;

use crate::GraphError;

/// Logical element type of a tensor.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElemType {
    /// IEEE half precision.
    F16,
    /// Brain float.
    BF16,
    /// IEEE single precision.
    F32,
    /// Signed byte.
    I8,
    /// Unsigned byte.
    U8,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
}

impl ElemType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElemType::F16 | ElemType::BF16 => 2,
            ElemType::F32 | ElemType::I32 | ElemType::U32 => 4,
            ElemType::I8 | ElemType::U8 => 1,
        }
    }

    /// Size of one element in bits.
    pub fn size_bits(&self) -> usize {
        self.size() * 8
    }

    /// Whether the type is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::F16 | ElemType::BF16 | ElemType::F32)
    }
}

impl From<QuantStore> for ElemType {
    fn from(store: QuantStore) -> Self {
        match store {
            QuantStore::I8 => ElemType::I8,
            QuantStore::U8 => ElemType::U8,
            QuantStore::U32 => ElemType::U32,
        }
    }
}

impl Display for ElemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ElemType::F16 => "f16",
            ElemType::BF16 => "bf16",
            ElemType::F32 => "f32",
            ElemType::I8 => "i8",
            ElemType::U8 => "u8",
            ElemType::I32 => "i32",
            ElemType::U32 => "u32",
        };
        f.write_str(name)
    }
}

/// How the elements of a tensor are laid out in memory.
///
/// Quantized tensors store `bits`-wide values packed inside a wider storage element, so the
/// storage type differs from the logical element type.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageType {
    /// The storage element.
    pub elem: ElemType,
    /// Number of bits used by a single logical value.
    pub bits: u8,
}

impl StorageType {
    /// Unpacked storage, one value per element.
    pub fn native(elem: ElemType) -> Self {
        Self {
            elem,
            bits: elem.size_bits() as u8,
        }
    }

    /// Packed storage of `bits`-wide values inside `elem`.
    pub fn packed(elem: ElemType, bits: u8) -> Result<Self, GraphError> {
        let storage_bits = elem.size_bits();
        if bits == 0 || bits as usize > storage_bits || storage_bits % bits as usize != 0 {
            return Err(GraphError::InvalidPacking {
                bits,
                storage_bits,
            });
        }
        Ok(Self { elem, bits })
    }

    /// Whether several values share one storage element.
    pub fn is_packed(&self) -> bool {
        (self.bits as usize) < self.elem.size_bits()
    }

    /// Number of values per storage element.
    pub fn values_per_elem(&self) -> usize {
        self.elem.size_bits() / self.bits as usize
    }
}
