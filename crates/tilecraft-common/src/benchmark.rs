use core::fmt::Display;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// How a duration was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimingMethod {
    /// Wall clock time measured on the host, including launch overhead.
    System,
    /// Time reported by the device, covering only the kernel execution.
    DeviceOnly,
}

/// Results of a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDurations {
    /// How the durations were measured.
    pub timing_method: TimingMethod,
    /// All durations of the run, in the order they were benchmarked
    pub durations: Vec<Duration>,
}

impl BenchmarkDurations {
    /// Construct from a list of host-measured durations.
    pub fn new(durations: Vec<Duration>) -> Self {
        Self {
            timing_method: TimingMethod::System,
            durations,
        }
    }

    /// Construct from a list of device-measured durations.
    pub fn from_device(durations: Vec<Duration>) -> Self {
        Self {
            timing_method: TimingMethod::DeviceOnly,
            durations,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Whether no sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    fn sorted(&self) -> Vec<Duration> {
        let mut sorted = self.durations.clone();
        sorted.sort();
        sorted
    }
}

/// Computed statistical values over a set of [benchmark durations](BenchmarkDurations).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkComputations {
    /// Mean of all the durations.
    pub mean: Duration,
    /// Median of all the durations.
    pub median: Duration,
    /// Variance of all the durations.
    pub variance: Duration,
    /// Minimum duration amongst all durations.
    pub min: Duration,
    /// Maximum duration amongst all durations.
    pub max: Duration,
}

impl BenchmarkComputations {
    /// Compute duration values and return a BenchmarkComputations struct.
    ///
    /// Empty durations yield all-zero computations.
    pub fn new(durations: &BenchmarkDurations) -> Self {
        if durations.is_empty() {
            return Self::default();
        }

        let sorted = durations.sorted();
        let count = sorted.len() as u32;
        let total = sorted
            .iter()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(*d));
        let mean = total / count;
        let variance = variance(&sorted, mean);

        Self {
            mean,
            median: sorted[sorted.len() / 2],
            variance,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

fn variance(durations: &[Duration], mean: Duration) -> Duration {
    let mean = mean.as_secs_f64();
    let sum = durations
        .iter()
        .map(|d| {
            let diff = d.as_secs_f64() - mean;
            diff * diff
        })
        .sum::<f64>();

    Duration::from_secs_f64(sum / durations.len() as f64)
}

impl Display for BenchmarkComputations {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "mean: {:?}, median: {:?}, min: {:?}, max: {:?}, variance: {:?}",
            self.mean, self.median, self.min, self.max, self.variance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn computations_over_unordered_samples() {
        let durations = BenchmarkDurations::from_device(vec![
            Duration::from_micros(30),
            Duration::from_micros(10),
            Duration::from_micros(20),
            Duration::from_micros(100),
            Duration::from_micros(40),
        ]);
        let computed = BenchmarkComputations::new(&durations);

        assert_eq!(computed.median, Duration::from_micros(30));
        assert_eq!(computed.min, Duration::from_micros(10));
        assert_eq!(computed.max, Duration::from_micros(100));
        assert_eq!(computed.mean, Duration::from_micros(40));
    }

    #[test]
    fn median_ignores_single_outlier() {
        let durations = BenchmarkDurations::new(vec![
            Duration::from_micros(10),
            Duration::from_micros(11),
            Duration::from_millis(50),
        ]);
        let computed = BenchmarkComputations::new(&durations);

        assert_eq!(computed.median, Duration::from_micros(11));
    }

    #[test]
    fn empty_durations_are_zero() {
        let computed = BenchmarkComputations::new(&BenchmarkDurations::new(Vec::new()));

        assert_eq!(computed, BenchmarkComputations::default());
    }
}
