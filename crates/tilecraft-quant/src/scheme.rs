use crate::QuantError;
use serde::{Deserialize, Serialize};

/// Describes how quantized weights are represented and decoded.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantScheme {
    /// Bit width of a single quantized value.
    pub bits: QuantBits,
    /// Whether values are signed or unsigned before encoding.
    pub source: SourceFormat,
    /// Data type used for storing packed values.
    pub store: QuantStore,
    /// Granularity of the scaling factors.
    pub level: QuantLevel,
    /// Whether values are multiplied by a scale during decoding.
    pub with_scaling: bool,
    /// Whether packed words are interleaved for fast decoding.
    pub fast_decoding: bool,
}

impl Default for QuantScheme {
    fn default() -> Self {
        Self {
            bits: QuantBits::B4,
            source: SourceFormat::Uint,
            store: QuantStore::I8,
            level: QuantLevel::Channel,
            with_scaling: false,
            fast_decoding: false,
        }
    }
}

impl QuantScheme {
    /// Set the bit width.
    pub fn with_bits(mut self, bits: QuantBits) -> Self {
        self.bits = bits;
        self
    }

    /// Set the source format.
    pub fn with_source(mut self, source: SourceFormat) -> Self {
        self.source = source;
        self
    }

    /// Set the storage type.
    pub fn with_store(mut self, store: QuantStore) -> Self {
        self.store = store;
        self
    }

    /// Set the quantization level.
    pub fn with_level(mut self, level: QuantLevel) -> Self {
        self.level = level;
        self
    }

    /// Enable or disable scaling.
    pub fn with_scaling(mut self, with_scaling: bool) -> Self {
        self.with_scaling = with_scaling;
        self
    }

    /// Enable or disable the fast decoding interleave.
    pub fn with_fast_decoding(mut self, fast_decoding: bool) -> Self {
        self.fast_decoding = fast_decoding;
        self
    }

    /// Returns the size of the quantization storage type in bits.
    pub fn size_bits_stored(&self) -> usize {
        self.store.size_bits()
    }

    /// Returns the size of a single quantized value in bits.
    pub fn size_bits_value(&self) -> usize {
        self.bits.size_bits()
    }

    /// Returns the number of quantized values stored in a single element.
    pub fn num_quants(&self) -> usize {
        self.size_bits_stored() / self.size_bits_value()
    }

    /// Inclusive range of the values accepted before encoding.
    pub fn value_range(&self) -> (i16, i16) {
        let bits = self.bits.size_bits() as u32;
        match self.source {
            SourceFormat::Uint => (0, ((1i32 << bits) - 1) as i16),
            SourceFormat::Int => (-(1i16 << (bits - 1)), ((1i32 << (bits - 1)) - 1) as i16),
        }
    }

    /// Offset added to a value to obtain its unsigned code.
    pub fn zero_point(&self) -> i16 {
        match self.source {
            SourceFormat::Uint => 0,
            SourceFormat::Int => 1 << (self.bits.size_bits() - 1),
        }
    }

    /// Number of scaling groups along a reduction dimension of size `k`.
    pub fn num_groups(&self, k: usize) -> usize {
        match self.level {
            QuantLevel::Channel => 1,
            QuantLevel::Block(size) => k.div_ceil(size),
        }
    }
}

/// Supported bit widths.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuantBits {
    /// 1-bit values.
    B1,
    /// 2-bit values.
    B2,
    /// 4-bit values.
    B4,
    /// 8-bit values.
    B8,
}

impl QuantBits {
    /// All supported bit widths, narrowest first.
    pub const ALL: [QuantBits; 4] = [QuantBits::B1, QuantBits::B2, QuantBits::B4, QuantBits::B8];

    /// Returns the bit width.
    pub fn size_bits(&self) -> usize {
        match self {
            QuantBits::B1 => 1,
            QuantBits::B2 => 2,
            QuantBits::B4 => 4,
            QuantBits::B8 => 8,
        }
    }
}

impl TryFrom<u8> for QuantBits {
    type Error = QuantError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(QuantBits::B1),
            2 => Ok(QuantBits::B2),
            4 => Ok(QuantBits::B4),
            8 => Ok(QuantBits::B8),
            bits => Err(QuantError::UnsupportedBits { bits }),
        }
    }
}

/// Whether quantized values are signed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Unsigned values in `[0, 2^bits)`.
    Uint,
    /// Signed values in `[-2^(bits-1), 2^(bits-1))`, stored with a zero point.
    Int,
}

/// Data type used to store packed values.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuantStore {
    /// Packed into signed bytes.
    I8,
    /// Packed into unsigned bytes.
    U8,
    /// Packed into 4-byte unsigned integers.
    U32,
}

impl QuantStore {
    /// Returns the size of the storage type in bits.
    pub fn size_bits(&self) -> usize {
        match self {
            QuantStore::I8 | QuantStore::U8 => 8,
            QuantStore::U32 => 32,
        }
    }
}

/// Granularity of the scaling factors.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuantLevel {
    /// One scale per output channel, covering the whole reduction dimension.
    Channel,
    /// One scale per block of the given size along the reduction dimension.
    Block(usize),
}

impl QuantLevel {
    /// Build the level from a group size where `-1` means a whole channel.
    pub fn from_group_size(group_size: i64) -> Self {
        if group_size <= 0 {
            QuantLevel::Channel
        } else {
            QuantLevel::Block(group_size as usize)
        }
    }
}
