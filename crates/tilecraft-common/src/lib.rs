#![warn(missing_docs)]

//! Common utilities shared by the tilecraft crates.

/// Benchmark durations and their statistics.
pub mod benchmark;

/// Stable hashing used for fingerprints and checksums.
pub mod hash;
