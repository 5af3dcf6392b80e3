#![warn(missing_docs)]

//! Autotuning search-and-select engine for fused tensor kernels.
//!
//! A [tuner](tune::Tuner) asks a [policy](tune::ConfigPolicy) for scheduling configurations,
//! compiles them in parallel through an external [compiler](tune::CandidateCompiler), measures
//! every kernel that built on a [runtime](tune::KernelRuntime) and keeps the fastest one.

#[macro_use]
extern crate derive_new;

/// Id types.
pub mod id;

/// Global configuration and loggers.
pub mod config;

/// Search, build, profiling and selection.
pub mod tune;
