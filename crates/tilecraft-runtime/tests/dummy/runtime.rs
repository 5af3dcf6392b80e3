use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tilecraft_ir::TensorData;
use tilecraft_quant::{PackedWeight, QuantScheme, WeightTransform};
use tilecraft_runtime::tune::{
    Configuration, ExecutionError, ExecutionOutput, KernelRuntime, LoadError,
};

use super::{DummyArtifact, expected_output, modeled_latency};

type LatencyFn = dyn Fn(&Configuration) -> Duration + Send + Sync;
type ConfigFn = dyn Fn(&Configuration) -> bool + Send + Sync;
type StallFn = dyn Fn(&Configuration, usize) -> Duration + Send + Sync;

/// Number of decoded weight values a decoding kernel outputs.
pub const DECODED_VALUES: usize = 16;

#[derive(Debug)]
pub struct DummyKernel {
    pub config: Configuration,
    runs: AtomicUsize,
}

/// Fake device reporting a modeled latency for every kernel.
pub struct DummyRuntime {
    device: String,
    latency: Box<LatencyFn>,
    wrong_output: Box<ConfigFn>,
    stall: Box<StallFn>,
    decoder: Option<(usize, QuantScheme)>,
    load_failures: AtomicUsize,
    loads: AtomicUsize,
    executions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DummyRuntime {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            latency: Box::new(modeled_latency),
            wrong_output: Box::new(|_| false),
            stall: Box::new(|_, _| Duration::ZERO),
            decoder: None,
            load_failures: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&Configuration) -> Duration + Send + Sync + 'static,
    {
        self.latency = Box::new(latency);
        self
    }

    /// Kernels of matching configurations return a corrupted output.
    pub fn with_wrong_output<F>(mut self, wrong: F) -> Self
    where
        F: Fn(&Configuration) -> bool + Send + Sync + 'static,
    {
        self.wrong_output = Box::new(wrong);
        self
    }

    /// Executions sleep for the returned duration, given the configuration and the number of
    /// previous executions of the same kernel.
    pub fn with_stall<F>(mut self, stall: F) -> Self
    where
        F: Fn(&Configuration, usize) -> Duration + Send + Sync + 'static,
    {
        self.stall = Box::new(stall);
        self
    }

    /// Kernels decode the packed weight at input `slot` and output its first values.
    pub fn with_weight_decoder(mut self, slot: usize, scheme: QuantScheme) -> Self {
        self.decoder = Some((slot, scheme));
        self
    }

    /// The first `count` loads fail.
    pub fn with_load_failures(self, count: usize) -> Self {
        self.load_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Largest number of executions ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn decode(
        &self,
        kernel: &DummyKernel,
        inputs: &[TensorData],
    ) -> Result<Option<TensorData>, ExecutionError> {
        let Some((slot, scheme)) = self.decoder else {
            return Ok(None);
        };
        let weight = inputs
            .get(slot)
            .ok_or_else(|| ExecutionError::Launch(format!("missing input {slot}")))?;
        let packed = PackedWeight {
            rows: weight.desc.shape[0],
            cols: weight.desc.shape[1],
            bytes: weight.bytes.clone(),
        };
        let transform = WeightTransform::new(scheme, kernel.config.propagate_weight_layout);
        let decoded = transform
            .unpack(&packed)
            .map_err(|err| ExecutionError::Launch(err.to_string()))?;
        let values: Vec<f32> = decoded.values[..DECODED_VALUES]
            .iter()
            .map(|value| *value as f32)
            .collect();
        let output = TensorData::from_f32([DECODED_VALUES], &values)
            .map_err(|err| ExecutionError::Launch(err.to_string()))?;
        Ok(Some(output))
    }
}

impl KernelRuntime for DummyRuntime {
    type Artifact = DummyArtifact;
    type Kernel = DummyKernel;

    fn device_id(&self) -> String {
        self.device.clone()
    }

    fn load(&self, artifact: &Self::Artifact) -> Result<Self::Kernel, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .load_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LoadError::Device(format!("{} is busy", self.device)));
        }

        Ok(DummyKernel {
            config: artifact.config,
            runs: AtomicUsize::new(0),
        })
    }

    fn execute(
        &self,
        kernel: &Self::Kernel,
        inputs: &[TensorData],
    ) -> Result<ExecutionOutput, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let run = kernel.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep((self.stall)(&kernel.config, run));
        let decoded = self.decode(kernel, inputs);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(output) = decoded? {
            return Ok(ExecutionOutput::new(
                vec![output],
                (self.latency)(&kernel.config),
            ));
        }

        let mut output = expected_output();
        if (self.wrong_output)(&kernel.config) {
            let mut values = output.to_f32().unwrap();
            values[2] += 1.0;
            output = TensorData::from_f32([values.len()], &values).unwrap();
        }

        Ok(ExecutionOutput::new(vec![output], (self.latency)(&kernel.config)))
    }
}
