use super::logger::{LogLevel, LoggerConfig};

/// Configuration of the on-device measurements.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProfilingConfig {
    /// Logger of the measured latencies.
    #[serde(default)]
    pub logger: LoggerConfig<ProfilingLogLevel>,
    /// Executions discarded before measuring.
    #[serde(default = "warmup_default")]
    pub warmup: usize,
    /// Timed executions per candidate.
    #[serde(default = "samples_default")]
    pub samples: usize,
    /// Time allowed to measure one candidate, in milliseconds.
    #[serde(default = "timeout_default")]
    pub timeout_ms: u64,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            logger: Default::default(),
            warmup: warmup_default(),
            samples: samples_default(),
            timeout_ms: timeout_default(),
        }
    }
}

fn warmup_default() -> usize {
    5
}

fn samples_default() -> usize {
    10
}

fn timeout_default() -> u64 {
    30_000
}

/// Verbosity of the profiling channel.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProfilingLogLevel {
    /// Nothing is logged.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,
    /// The median latency of every candidate.
    #[serde(rename = "basic")]
    Basic,
    /// Every sample of every candidate.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for ProfilingLogLevel {}
