//! Data model of the tilecraft search engine.
//!
//! An [operator graph](OperatorGraph) is built from a closed set of [stages](Stage), each carrying
//! its own shape payload. Connecting two stages checks that the producer's output descriptor is
//! exactly the consumer's input descriptor. A [hardware profile](HardwareProfile) describes the
//! target accelerator and a [fingerprint](ShapeFingerprint) identifies a unique search problem.

#[macro_use]
extern crate derive_new;

mod data;
mod dtype;
mod error;
mod fingerprint;
mod graph;
mod hardware;
mod stage;
mod tensor;

pub use data::*;
pub use dtype::*;
pub use error::*;
pub use fingerprint::*;
pub use graph::*;
pub use hardware::*;
pub use stage::*;
pub use tensor::*;
