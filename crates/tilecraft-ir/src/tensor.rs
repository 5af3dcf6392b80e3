use core::fmt::Display;
use serde::{Deserialize, Serialize};

use crate::{ElemType, StorageType};

/// Shape and types of a tensor flowing between stages.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    /// Dimension sizes, outermost first.
    pub shape: Vec<usize>,
    /// Logical element type.
    pub dtype: ElemType,
    /// Storage type, different from the logical type for packed tensors.
    pub storage: StorageType,
}

impl TensorDesc {
    /// Create an unpacked descriptor.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: ElemType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            storage: StorageType::native(dtype),
        }
    }

    /// Create a packed descriptor, the logical shape counting individual values.
    pub fn packed(shape: impl Into<Vec<usize>>, dtype: ElemType, storage: StorageType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            storage,
        }
    }

    /// Number of logical values.
    pub fn num_elems(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of bytes needed to store the tensor.
    pub fn size_bytes(&self) -> usize {
        (self.num_elems() * self.storage.bits as usize).div_ceil(8)
    }
}

impl Display for TensorDesc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}<{}", self.shape, self.dtype)?;
        if self.storage.is_packed() {
            write!(f, " as {}x{}", self.storage.bits, self.storage.elem)?;
        }
        f.write_str(">")
    }
}
