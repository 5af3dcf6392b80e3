use core::time::Duration;
use thiserror::Error;
use tilecraft_ir::TensorData;

/// Errors when loading an artifact on the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The artifact is malformed.
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),
    /// The device refused the kernel.
    #[error("Device error: {0}")]
    Device(String),
}

/// Errors when running a kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The kernel couldn't be launched with these inputs.
    #[error("Launch failed: {0}")]
    Launch(String),
    /// The device reported a fault while running.
    #[error("Device error: {0}")]
    Device(String),
}

/// Results of one kernel execution.
#[derive(new, Debug, Clone)]
pub struct ExecutionOutput {
    /// Output tensors, in the order of the graph outputs.
    pub outputs: Vec<TensorData>,
    /// Device-measured execution time.
    pub elapsed: Duration,
}

/// Loads compiled artifacts on a device and runs them.
pub trait KernelRuntime: Send + Sync + 'static {
    /// Artifact produced by the matching compiler.
    type Artifact: Send + Sync + 'static;
    /// A kernel ready to be executed.
    type Kernel: Send + Sync + 'static;

    /// Identifies the device; measurements on the same device are serialized.
    fn device_id(&self) -> String;

    /// Load an artifact. Loading the same artifact twice must be harmless.
    fn load(&self, artifact: &Self::Artifact) -> Result<Self::Kernel, LoadError>;

    /// Run a kernel once.
    fn execute(
        &self,
        kernel: &Self::Kernel,
        inputs: &[TensorData],
    ) -> Result<ExecutionOutput, ExecutionError>;
}
