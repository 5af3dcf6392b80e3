use core::time::Duration;
use thiserror::Error;
use tilecraft_ir::GraphError;
use tilecraft_quant::QuantError;

use super::{CompilationError, ExecutionError, LoadError, SearchSummary};

/// Phase of a candidate's life that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TimeoutPhase {
    /// Compiling and loading the kernel.
    Build,
    /// Measuring the kernel on the device.
    Profile,
}

impl core::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimeoutPhase::Build => f.write_str("build"),
            TimeoutPhase::Profile => f.write_str("profile"),
        }
    }
}

/// Why a single candidate isn't viable.
///
/// None of these errors stop a search; the candidate keeps the sentinel latency and is skipped
/// by the selector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CandidateError {
    /// The configuration was rejected before compiling.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The compiler failed.
    #[error("Build failed: {0}")]
    Build(#[from] CompilationError),

    /// The artifact couldn't be loaded on the device.
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    /// The kernel failed while running.
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// The candidate didn't finish in time.
    #[error("The {phase} phase timed out after {after:?}")]
    Timeout {
        /// Phase that timed out.
        phase: TimeoutPhase,
        /// The limit that was exceeded.
        after: Duration,
    },

    /// An output value is outside the tolerance of the reference.
    #[error(
        "Output {output} differs from the reference at index {index}: expected {expected}, got {actual}"
    )]
    NumericMismatch {
        /// Index of the output tensor.
        output: usize,
        /// Index of the first mismatching value.
        index: usize,
        /// Reference value.
        expected: f32,
        /// Value produced by the kernel.
        actual: f32,
    },

    /// The outputs can't be compared with the reference.
    #[error("Outputs don't match the reference layout: {0}")]
    InvalidOutputs(String),

    /// The compiler or the runtime panicked.
    #[error("Panicked: {0}")]
    Panicked(String),
}

/// Terminal errors of a search.
#[derive(Error, Debug, Clone)]
pub enum TuneError {
    /// Every candidate failed to build, load, run or verify.
    #[error("No viable candidate among {} evaluated\n{summary}", summary.entries.len())]
    NoViableCandidate {
        /// Per-candidate outcomes of the search.
        summary: SearchSummary,
    },

    /// The graph or the hardware profile admits no search.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The quantized weight can't be packed.
    #[error("Quantization error: {0}")]
    Quant(#[from] QuantError),

    /// The workload doesn't fit the graph.
    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),
}

/// Readable message out of a panic payload.
pub(crate) fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
