/// Autotune config module.
pub mod autotune;
/// Build config module.
pub mod build;
/// Profiling config module.
pub mod profiling;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
