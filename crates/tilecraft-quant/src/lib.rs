#![warn(missing_docs)]

//! Reference codec for low-bit quantized weights.
//!
//! Quantized weights are stored as unsigned codes packed into storage elements, optionally
//! permuted so the kernel can decode them efficiently:
//!
//! 1. **Layout propagation**: 16x16 weight tiles are reordered to match the fragment layout used
//!    by tensor-core loads.
//! 2. **Packing**: `bits`-wide codes are packed little-endian into the storage element.
//! 3. **Fast decoding interleave**: inside each 32-bit word, codes are reordered so even and odd
//!    values can be extracted with the same shift.
//!
//! [`unpack`] undoes the three steps, so `unpack(permute_and_pack(w)) == w` holds for every
//! supported scheme.

#[macro_use]
extern crate derive_new;

mod error;
mod pack;
mod permute;
mod scheme;
mod transform;

pub use error::*;
pub use pack::*;
pub use permute::*;
pub use scheme::*;
pub use transform::*;
