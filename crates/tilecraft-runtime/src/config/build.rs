use super::logger::{BinaryLogLevel, LoggerConfig};

/// Configuration of the parallel build pool.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BuildConfig {
    /// Logger of the build failures.
    #[serde(default)]
    pub logger: LoggerConfig<BuildLogLevel>,
    /// Number of build workers, defaults to the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Time allowed to compile one candidate, in milliseconds.
    #[serde(default = "compile_timeout_default")]
    pub compile_timeout_ms: u64,
    /// Number of additional attempts when loading an artifact fails.
    #[serde(default = "load_retries_default")]
    pub load_retries: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            logger: Default::default(),
            workers: None,
            compile_timeout_ms: compile_timeout_default(),
            load_retries: load_retries_default(),
        }
    }
}

fn compile_timeout_default() -> u64 {
    60_000
}

fn load_retries_default() -> usize {
    2
}

/// Verbosity of the build channel.
pub type BuildLogLevel = BinaryLogLevel;
