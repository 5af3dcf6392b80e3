use thiserror::Error;
use tilecraft_ir::{HardwareProfile, OperatorGraph};

use super::Configuration;

/// Errors reported by a [CandidateCompiler].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilationError {
    /// The backend can't express the configuration for this graph.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
    /// Code generation or the device compiler failed.
    #[error("Code generation failed: {0}")]
    Generation(String),
}

/// Output of a successful compilation.
#[derive(new, Debug, Clone)]
pub struct CompiledCandidate<A> {
    /// Handle to the compiled artifact.
    pub artifact: A,
    /// Generated source, when the backend exposes it.
    pub source: Option<String>,
}

/// Turns an operator graph and a scheduling configuration into a loadable artifact.
///
/// Implementations are called concurrently from the build workers, each call with a unique
/// `name` so that intermediate files never collide. A failure or a panic only discards the
/// candidate being compiled.
pub trait CandidateCompiler: Send + Sync + 'static {
    /// Compiled artifact, loaded later by a [KernelRuntime](super::KernelRuntime).
    type Artifact: Send + Sync + 'static;

    /// Identity of the compiler, part of the persistent cache checksum.
    fn name(&self) -> String {
        core::any::type_name::<Self>().to_string()
    }

    /// Compile one candidate.
    fn compile(
        &self,
        graph: &OperatorGraph,
        config: &Configuration,
        target: &HardwareProfile,
        name: &str,
    ) -> Result<CompiledCandidate<Self::Artifact>, CompilationError>;
}
