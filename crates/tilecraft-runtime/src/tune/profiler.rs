use core::time::Duration;
use hashbrown::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
};
use std::thread;
use std::time::Instant;
use tilecraft_common::benchmark::{BenchmarkComputations, BenchmarkDurations};
use tilecraft_ir::{DequantizeMatmul, OperatorGraph, Stage, TensorData};
use tilecraft_quant::{QuantizedWeight, WeightTransform};

use super::{
    CandidateError, CandidateResult, Configuration, KernelRuntime, TimeoutPhase, TuneError,
    panic_message,
};
use crate::config::{Logger, profiling::ProfilingLogLevel};

/// How candidates are measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileOptions {
    /// Executions discarded before timing.
    pub warmup: usize,
    /// Timed executions, at least one.
    pub samples: usize,
    /// Time allowed to measure one candidate.
    pub timeout: Duration,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            warmup: 5,
            samples: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Accepted distance between a result and its reference: `|a - b| <= atol + rtol * |b|`.
#[derive(new, Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Absolute tolerance.
    pub atol: f32,
    /// Relative tolerance.
    pub rtol: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            atol: 1e-2,
            rtol: 1e-2,
        }
    }
}

impl Tolerance {
    fn accepts(&self, actual: f32, expected: f32) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Expected outputs of a graph.
#[derive(new, Debug, Clone, PartialEq)]
pub struct Reference {
    /// One tensor per graph output, in output order.
    pub outputs: Vec<TensorData>,
    /// Accepted error of floating point outputs.
    pub tolerance: Tolerance,
}

impl Reference {
    /// Check kernel outputs against the reference.
    pub fn check(&self, outputs: &[TensorData]) -> Result<(), CandidateError> {
        if outputs.len() != self.outputs.len() {
            return Err(CandidateError::InvalidOutputs(format!(
                "expected {} outputs, got {}",
                self.outputs.len(),
                outputs.len()
            )));
        }

        for (output, (actual, expected)) in outputs.iter().zip(self.outputs.iter()).enumerate() {
            if actual.desc != expected.desc {
                return Err(CandidateError::InvalidOutputs(format!(
                    "output {output} is {}, expected {}",
                    actual.desc, expected.desc
                )));
            }

            match (actual.to_f32(), expected.to_f32()) {
                (Ok(actual), Ok(expected)) => {
                    let mismatch = actual
                        .iter()
                        .zip(expected.iter())
                        .position(|(a, e)| !self.tolerance.accepts(*a, *e));
                    if let Some(index) = mismatch {
                        return Err(CandidateError::NumericMismatch {
                            output,
                            index,
                            expected: expected[index],
                            actual: actual[index],
                        });
                    }
                }
                // Integer outputs must match exactly.
                _ => {
                    let mismatch = actual
                        .bytes
                        .iter()
                        .zip(expected.bytes.iter())
                        .position(|(a, e)| a != e);
                    if let Some(index) = mismatch {
                        return Err(CandidateError::NumericMismatch {
                            output,
                            index,
                            expected: expected.bytes[index] as f32,
                            actual: actual.bytes[index] as f32,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Inputs used to run every candidate, and optionally their expected outputs.
#[derive(Debug, Clone)]
pub struct Workload {
    /// One tensor per unconnected graph input, in [OperatorGraph::inputs] order.
    pub inputs: Arc<Vec<TensorData>>,
    /// Same inputs with the quantized weight packed in fragment layout.
    propagated: Option<Arc<Vec<TensorData>>>,
    /// Expected outputs, checked after the timed executions.
    pub reference: Option<Arc<Reference>>,
}

impl Workload {
    /// Workload without numeric check.
    pub fn new(inputs: Vec<TensorData>) -> Self {
        Self {
            inputs: Arc::new(inputs),
            propagated: None,
            reference: None,
        }
    }

    /// Zero-filled inputs for every unconnected input of `graph`.
    pub fn zeros(graph: &OperatorGraph) -> Self {
        Self::new(graph.inputs().into_iter().map(TensorData::zeros).collect())
    }

    /// Check the outputs of every candidate against `reference`.
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(Arc::new(reference));
        self
    }

    /// Feed the logical `weight` of the dequantize matmul of `graph` to every candidate.
    ///
    /// The weight is packed with the scheme of the stage, once in row-major order and, when the
    /// stage allows it, once in fragment layout for configurations propagating the weight layout.
    pub fn with_quantized_weight(
        mut self,
        graph: &OperatorGraph,
        weight: &QuantizedWeight,
    ) -> Result<Self, TuneError> {
        let (slot, stage) = quantized_weight_slot(graph).ok_or_else(|| {
            TuneError::InvalidWorkload(format!("{} has no quantized weight input", graph.name()))
        })?;
        if weight.rows != stage.n || weight.cols != stage.k {
            return Err(TuneError::InvalidWorkload(format!(
                "expected a {}x{} weight, got {}x{}",
                stage.n, stage.k, weight.rows, weight.cols
            )));
        }
        if slot >= self.inputs.len() {
            return Err(TuneError::InvalidWorkload(format!(
                "expected {} inputs, got {}",
                graph.inputs().len(),
                self.inputs.len()
            )));
        }

        let pack = |propagate_layout: bool| -> Result<Arc<Vec<TensorData>>, TuneError> {
            let packed =
                WeightTransform::new(stage.scheme, propagate_layout).permute_and_pack(weight)?;
            let data = TensorData::new(stage.weight_desc(), packed.bytes)
                .map_err(|err| TuneError::InvalidWorkload(err.to_string()))?;
            let mut inputs = self.inputs.as_ref().clone();
            inputs[slot] = data;
            Ok(Arc::new(inputs))
        };

        let inputs = pack(false)?;
        let propagated = match stage.propagate_b {
            true => Some(pack(true)?),
            false => None,
        };
        self.inputs = inputs;
        self.propagated = propagated;

        Ok(self)
    }

    /// Inputs matching the weight layout expected by `config`.
    pub fn inputs_for(&self, config: &Configuration) -> Arc<Vec<TensorData>> {
        match (&self.propagated, config.propagate_weight_layout) {
            (Some(propagated), true) => propagated.clone(),
            _ => self.inputs.clone(),
        }
    }
}

/// Position of the first caller-supplied quantized weight in [OperatorGraph::inputs] order.
fn quantized_weight_slot(graph: &OperatorGraph) -> Option<(usize, DequantizeMatmul)> {
    let mut slot = 0;
    for node in graph.nodes() {
        for (input, producer) in node.producers.iter().enumerate() {
            if producer.is_some() {
                continue;
            }
            if let (Some(Stage::DequantizeMatmul(stage)), 1) = (node.stage(), input) {
                return Some((slot, stage.clone()));
            }
            slot += 1;
        }
    }
    None
}

static SHARED_DEVICE_LOCKS: spin::Mutex<Option<Arc<DeviceLocks>>> = spin::Mutex::new(None);

/// Exclusive access to one device.
#[derive(Default, Debug)]
pub struct DeviceLock {
    busy: AtomicBool,
}

/// Held while kernels run on a device; releases the device when dropped.
#[derive(Debug)]
pub struct DeviceLease {
    lock: Arc<DeviceLock>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

impl DeviceLock {
    /// Take the device if nobody holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<DeviceLease> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| DeviceLease { lock: self.clone() })
    }

    /// Wait at most `timeout` for the device.
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Option<DeviceLease> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire() {
                return Some(lease);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(LEASE_POLL_INTERVAL);
        }
    }

    /// Whether a lease is currently held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One lock per device, so that a device never measures two kernels at once.
///
/// Tuners only exclude each other when they share the same set, see [DeviceLocks::shared].
#[derive(Default, Debug)]
pub struct DeviceLocks {
    locks: spin::Mutex<HashMap<String, Arc<DeviceLock>>>,
}

impl DeviceLocks {
    /// The set used by every tuner of the process unless another one is given.
    pub fn shared() -> Arc<Self> {
        let mut state = SHARED_DEVICE_LOCKS.lock();
        state.get_or_insert_with(Default::default).clone()
    }

    /// The lock of a device.
    pub fn get(&self, device: &str) -> Arc<DeviceLock> {
        let mut locks = self.locks.lock();
        locks
            .entry(device.to_string())
            .or_insert_with(Default::default)
            .clone()
    }
}

type Measurement = Result<(Vec<Duration>, Vec<TensorData>), CandidateError>;

fn measure<R: KernelRuntime>(
    runtime: &R,
    kernel: &R::Kernel,
    inputs: &[TensorData],
    options: &ProfileOptions,
) -> Measurement {
    for _ in 0..options.warmup {
        runtime.execute(kernel, inputs)?;
    }

    let mut durations = Vec::with_capacity(options.samples);
    let mut outputs = Vec::new();
    for _ in 0..options.samples.max(1) {
        let execution = runtime.execute(kernel, inputs)?;
        durations.push(execution.elapsed);
        outputs = execution.outputs;
    }

    Ok((durations, outputs))
}

/// Measure every candidate holding a kernel, in order.
///
/// Each measurement holds the lease of the runtime's device until its last execution returns,
/// even past its timeout. A candidate waits at most the profiling timeout for the device; once
/// the device stays busy that long, the remaining candidates time out without running. The
/// latency of a candidate is the median of its timed executions; failures and outputs rejected
/// by the reference leave it at the sentinel latency.
pub fn profile_all<R: KernelRuntime>(
    runtime: &Arc<R>,
    candidates: &mut [CandidateResult<R::Artifact, R::Kernel>],
    workload: &Workload,
    options: &ProfileOptions,
    locks: &DeviceLocks,
    logger: &mut Logger,
) {
    let device = runtime.device_id();
    let lock = locks.get(&device);
    let mut device_stuck = false;

    for candidate in candidates.iter_mut() {
        if candidate.error.is_some() {
            continue;
        }
        let Some(kernel) = candidate.kernel.clone() else {
            continue;
        };

        let lease = match device_stuck {
            true => None,
            false => lock.acquire(options.timeout),
        };
        let Some(lease) = lease else {
            device_stuck = true;
            logger.log_profiling(&format!(
                "Device {device} is still busy, {} isn't measured",
                candidate.name
            ));
            candidate.fail(CandidateError::Timeout {
                phase: TimeoutPhase::Profile,
                after: options.timeout,
            });
            continue;
        };

        let (sender, receiver) = mpsc::channel();
        let runtime_thread = runtime.clone();
        let inputs = workload.inputs_for(&candidate.config);
        let options_thread = options.clone();

        let spawned = thread::Builder::new()
            .name(format!("tilecraft-profile-{}", candidate.name))
            .spawn(move || {
                let measurement = catch_unwind(AssertUnwindSafe(|| {
                    measure(runtime_thread.as_ref(), &kernel, &inputs, &options_thread)
                }))
                .unwrap_or_else(|payload| {
                    Err(CandidateError::Panicked(panic_message(&*payload)))
                });
                drop(lease);
                // The receiver is gone when the measurement timed out.
                let _ = sender.send(measurement);
            });

        if let Err(err) = spawned {
            candidate.fail(CandidateError::Panicked(format!(
                "Unable to spawn a profiling thread: {err}"
            )));
            continue;
        }

        let measurement = match receiver.recv_timeout(options.timeout) {
            Ok(measurement) => measurement,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CandidateError::Timeout {
                phase: TimeoutPhase::Profile,
                after: options.timeout,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CandidateError::Panicked(
                "the profiling thread exited without reporting".to_string(),
            )),
        };

        let (durations, outputs) = match measurement {
            Ok(measurement) => measurement,
            Err(err) => {
                logger.log_profiling(&format!("Failed to profile {}: {err}", candidate.name));
                candidate.fail(err);
                continue;
            }
        };

        let durations = BenchmarkDurations::from_device(durations);
        let computations = BenchmarkComputations::new(&durations);
        candidate.latency = computations.median;
        candidate.durations = Some(durations);

        if let Some(reference) = &workload.reference {
            if let Err(err) = reference.check(&outputs) {
                logger.log_profiling(&format!("Rejected {}: {err}", candidate.name));
                candidate.fail(err);
                continue;
            }
        }

        if logger.log_level_profiling() == ProfilingLogLevel::Full {
            logger.log_profiling(&format!("{} {}", candidate.name, computations));
        } else if logger.log_level_profiling() == ProfilingLogLevel::Basic {
            logger.log_profiling(&format!("{} {:?}", candidate.name, candidate.latency));
        }
    }
}
