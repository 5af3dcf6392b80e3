use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tilecraft_ir::{HardwareProfile, OperatorGraph};
use tilecraft_runtime::tune::{
    CandidateCompiler, CompilationError, CompiledCandidate, Configuration,
};

/// What the dummy compiler does with a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFault {
    /// Report a code generation error.
    Error,
    /// Panic while compiling.
    Panic,
    /// Compile normally after sleeping.
    Sleep(Duration),
}

type FaultFn = dyn Fn(&Configuration) -> Option<BuildFault> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyArtifact {
    pub name: String,
    pub config: Configuration,
}

pub struct DummyCompiler {
    fault: Box<FaultFn>,
    calls: AtomicUsize,
    names: spin::Mutex<Vec<String>>,
}

impl DummyCompiler {
    pub fn new() -> Self {
        Self::with_faults(|_| None)
    }

    pub fn with_faults<F>(fault: F) -> Self
    where
        F: Fn(&Configuration) -> Option<BuildFault> + Send + Sync + 'static,
    {
        Self {
            fault: Box::new(fault),
            calls: AtomicUsize::new(0),
            names: spin::Mutex::new(Vec::new()),
        }
    }

    /// Number of compilations started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Build names received so far.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }
}

impl CandidateCompiler for DummyCompiler {
    type Artifact = DummyArtifact;

    fn name(&self) -> String {
        "dummy-compiler".to_string()
    }

    fn compile(
        &self,
        _graph: &OperatorGraph,
        config: &Configuration,
        _target: &HardwareProfile,
        name: &str,
    ) -> Result<CompiledCandidate<Self::Artifact>, CompilationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().push(name.to_string());

        match (self.fault)(config) {
            Some(BuildFault::Error) => {
                return Err(CompilationError::Generation(format!("no code for {config}")));
            }
            Some(BuildFault::Panic) => panic!("Compiler crashed on {config}"),
            Some(BuildFault::Sleep(duration)) => std::thread::sleep(duration),
            None => {}
        }

        let artifact = DummyArtifact {
            name: name.to_string(),
            config: *config,
        };
        Ok(CompiledCandidate::new(artifact, Some(format!("// {name}"))))
    }
}
