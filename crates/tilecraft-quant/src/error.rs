use thiserror::Error;

/// Errors raised by the weight codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantError {
    /// The bit width isn't one of 1, 2, 4 or 8.
    #[error("Unsupported quantization bit width {bits}, expected one of 1, 2, 4 or 8")]
    UnsupportedBits {
        /// The requested bit width.
        bits: u8,
    },

    /// A value can't be represented with the scheme's bit width and source format.
    #[error("Value {value} at index {index} is outside the representable range [{min}, {max}]")]
    OutOfRange {
        /// Flat index of the value.
        index: usize,
        /// The offending value.
        value: i16,
        /// Smallest representable value.
        min: i16,
        /// Largest representable value.
        max: i16,
    },

    /// The buffer doesn't match the declared shape.
    #[error("Expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Number of elements implied by the shape.
        expected: usize,
        /// Number of elements provided.
        actual: usize,
    },

    /// A dimension isn't a multiple of what the transform requires.
    #[error("{what} of {extent} must be a multiple of {multiple}")]
    Misaligned {
        /// Which dimension is misaligned.
        what: &'static str,
        /// The dimension extent.
        extent: usize,
        /// The required multiple.
        multiple: usize,
    },
}
