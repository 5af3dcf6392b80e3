use core::{fmt::Display, time::Duration};
use std::sync::Arc;
use tilecraft_common::benchmark::{BenchmarkComputations, BenchmarkDurations};
use tilecraft_ir::HardwareProfile;

use super::{CandidateError, Configuration};

/// Latency of candidates that weren't measured.
pub const SENTINEL_LATENCY: Duration = Duration::MAX;

/// Pass of the search that emitted a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Pass {
    /// The broad pass over the whole search space.
    Broad,
    /// The narrow pass around the best broad candidates.
    Narrow,
    /// A configuration restored from the persistent cache.
    Cache,
}

impl Display for Pass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Pass::Broad => f.write_str("broad"),
            Pass::Narrow => f.write_str("narrow"),
            Pass::Cache => f.write_str("cache"),
        }
    }
}

/// Everything known about one candidate of a search.
#[derive(Debug)]
pub struct CandidateResult<A, K> {
    /// Emission index, unique across the passes of one search.
    pub index: usize,
    /// Pass that emitted the candidate.
    pub pass: Pass,
    /// The scheduling configuration.
    pub config: Configuration,
    /// Unique build name.
    pub name: String,
    /// Compiled artifact, absent when the build failed.
    pub artifact: Option<Arc<A>>,
    /// Loaded kernel, absent when the build or the load failed.
    pub kernel: Option<Arc<K>>,
    /// Generated source, when the compiler exposes it.
    pub source: Option<String>,
    /// Median latency, [SENTINEL_LATENCY] when not measured.
    pub latency: Duration,
    /// Every timed sample.
    pub durations: Option<BenchmarkDurations>,
    /// Why the candidate isn't viable.
    pub error: Option<CandidateError>,
}

impl<A, K> Clone for CandidateResult<A, K> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            pass: self.pass,
            config: self.config,
            name: self.name.clone(),
            artifact: self.artifact.clone(),
            kernel: self.kernel.clone(),
            source: self.source.clone(),
            latency: self.latency,
            durations: self.durations.clone(),
            error: self.error.clone(),
        }
    }
}

impl<A, K> CandidateResult<A, K> {
    /// A candidate that wasn't built yet.
    pub fn pending(index: usize, pass: Pass, config: Configuration, name: String) -> Self {
        Self {
            index,
            pass,
            config,
            name,
            artifact: None,
            kernel: None,
            source: None,
            latency: SENTINEL_LATENCY,
            durations: None,
            error: None,
        }
    }

    /// Whether the candidate can be selected.
    pub fn is_viable(&self) -> bool {
        self.kernel.is_some() && self.error.is_none() && self.latency != SENTINEL_LATENCY
    }

    /// Mark the candidate as failed, dropping its measurements.
    pub fn fail(&mut self, error: CandidateError) {
        self.latency = SENTINEL_LATENCY;
        self.error = Some(error);
    }

    /// Summary statistics of the timed samples.
    pub fn computations(&self) -> Option<BenchmarkComputations> {
        self.durations.as_ref().map(BenchmarkComputations::new)
    }

    /// Summary line of the candidate.
    pub fn entry(&self) -> SummaryEntry {
        SummaryEntry {
            index: self.index,
            pass: self.pass,
            name: self.name.clone(),
            config: self.config,
            latency: self.latency,
            error: self.error.clone(),
        }
    }
}

/// One line of a [SearchSummary].
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    /// Emission index.
    pub index: usize,
    /// Pass that emitted the candidate.
    pub pass: Pass,
    /// Unique build name.
    pub name: String,
    /// The scheduling configuration.
    pub config: Configuration,
    /// Median latency, [SENTINEL_LATENCY] when not measured.
    pub latency: Duration,
    /// Why the candidate isn't viable.
    pub error: Option<CandidateError>,
}

impl SummaryEntry {
    /// Whether the candidate was measured without error.
    pub fn is_viable(&self) -> bool {
        self.error.is_none() && self.latency != SENTINEL_LATENCY
    }
}

/// Outcome of every candidate of a search, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    /// Name of the graph.
    pub graph: String,
    /// Name of the hardware profile.
    pub hardware: String,
    /// One entry per candidate, in emission order.
    pub entries: Vec<SummaryEntry>,
}

impl SearchSummary {
    /// Summary of a list of candidates.
    pub fn new<A, K>(graph: &str, hardware: &str, results: &[CandidateResult<A, K>]) -> Self {
        Self {
            graph: graph.to_string(),
            hardware: hardware.to_string(),
            entries: results.iter().map(CandidateResult::entry).collect(),
        }
    }

    /// Viable entries first by increasing latency, then failed entries in emission order.
    pub fn ranked(&self) -> Vec<&SummaryEntry> {
        let mut ranked: Vec<&SummaryEntry> = self.entries.iter().collect();
        ranked.sort_by_key(|entry| (!entry.is_viable(), entry.latency, entry.index));
        ranked
    }

    /// Number of viable candidates.
    pub fn num_viable(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_viable()).count()
    }

    /// Number of failed candidates.
    pub fn num_failed(&self) -> usize {
        self.entries.len() - self.num_viable()
    }

    /// Latency of the first viable candidate in emission order.
    pub fn top1(&self) -> Option<Duration> {
        self.entries
            .iter()
            .find(|entry| entry.is_viable())
            .map(|entry| entry.latency)
    }

    /// Lowest latency among viable candidates.
    pub fn best(&self) -> Option<Duration> {
        self.ranked()
            .first()
            .filter(|entry| entry.is_viable())
            .map(|entry| entry.latency)
    }
}

impl Display for SearchSummary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let header_rank = "Rank";
        let header_name = "Name";
        let header_config = "Configuration";
        let header_latency = "Latency";

        let ranked = self.ranked();
        let items: Vec<(String, String, String, String)> = ranked
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                let latency = match &entry.error {
                    None if entry.latency != SENTINEL_LATENCY => format!("{:?}", entry.latency),
                    None => "-".to_string(),
                    Some(err) => {
                        let err = err.to_string();
                        let first_line = err.lines().next().unwrap_or_default();
                        format!("failed: {first_line}")
                    }
                };
                (
                    format!("{}", rank + 1),
                    format!("{} ({})", entry.name, entry.pass),
                    entry.config.to_string(),
                    latency,
                )
            })
            .collect();

        let rank_len = items.iter().map(|i| i.0.len()).fold(header_rank.len(), usize::max);
        let name_len = items.iter().map(|i| i.1.len()).fold(header_name.len(), usize::max);
        let config_len = items.iter().map(|i| i.2.len()).fold(header_config.len(), usize::max);
        let latency_len = items.iter().map(|i| i.3.len()).fold(header_latency.len(), usize::max);

        let line_length = rank_len + name_len + config_len + latency_len + 11;
        let write_line = |char: &str, f: &mut core::fmt::Formatter<'_>| {
            writeln!(f, "|{}|", char.repeat(line_length))
        };

        writeln!(
            f,
            "{} on {}: {} viable / {} candidates",
            self.graph,
            self.hardware,
            self.num_viable(),
            self.entries.len()
        )?;
        write_line("⎺", f)?;
        writeln!(
            f,
            "| {header_rank:<rank_len$} | {header_name:<name_len$} | {header_config:<config_len$} | {header_latency:<latency_len$} |",
        )?;
        write_line("⎼", f)?;

        for (rank, name, config, latency) in items {
            writeln!(
                f,
                "| {rank:<rank_len$} | {name:<name_len$} | {config:<config_len$} | {latency:<latency_len$} |",
            )?;
        }

        write_line("⎯", f)?;

        if let (Some(top1), Some(best)) = (self.top1(), self.best()) {
            writeln!(f, "top1 {top1:?}, best {best:?}")?;
        }

        Ok(())
    }
}

/// Achieved throughput of a kernel against the peak of its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Arithmetic operations of one execution.
    pub flops: u64,
    /// Measured latency.
    pub latency: Duration,
    /// Achieved TFLOP/s.
    pub tflops: f64,
    /// Peak TFLOP/s of the units used by the kernel.
    pub peak_tflops: f64,
    /// Achieved fraction of the peak, in percent.
    pub percent_of_peak: f64,
}

impl Throughput {
    /// Throughput of a kernel running `flops` operations in `latency`.
    pub fn new(
        flops: u64,
        latency: Duration,
        hardware: &HardwareProfile,
        use_tensor_core: bool,
    ) -> Self {
        let seconds = latency.as_secs_f64();
        let achieved = match seconds > 0.0 {
            true => flops as f64 / seconds,
            false => 0.0,
        };
        let peak = hardware.peak(use_tensor_core);

        Self {
            flops,
            latency,
            tflops: achieved / 1e12,
            peak_tflops: peak / 1e12,
            percent_of_peak: match peak > 0.0 {
                true => 100.0 * achieved / peak,
                false => 0.0,
            },
        }
    }
}

impl Display for Throughput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:.2} TFLOP/s ({:.1}% of {:.1} TFLOP/s peak) in {:?}",
            self.tflops, self.percent_of_peak, self.peak_tflops, self.latency
        )
    }
}

/// Accepted result of a search.
#[derive(Debug)]
pub struct TuneOutcome<A, K> {
    /// The fastest viable candidate.
    pub best: CandidateResult<A, K>,
    /// Outcome of every candidate.
    pub summary: SearchSummary,
    /// Number of passes that ran.
    pub passes: usize,
    /// Throughput of the best candidate.
    pub throughput: Throughput,
}
