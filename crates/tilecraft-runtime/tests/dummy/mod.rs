mod compiler;
mod policy;
mod runtime;

pub use compiler::*;
pub use policy::*;
pub use runtime::*;

use std::sync::Arc;
use tilecraft_ir::{ElemType, HardwareProfile, Matmul, OperatorGraph, Stage, TensorData};
use tilecraft_runtime::{
    config::{GlobalConfig, Logger},
    tune::{Configuration, Reference, Tolerance, TuneOptions, Workload},
};

/// Stable pseudo-random value of a configuration, identical across runs.
pub fn config_hash(config: &Configuration) -> u64 {
    let fields = [
        config.block.m,
        config.block.n,
        config.block.k,
        config.warp.m,
        config.warp.n,
        config.vectorize,
        config.pipeline_stages,
        config.use_tensor_core as usize,
        config.fuse_epilogue as usize,
        config.propagate_input_layout as usize,
        config.propagate_weight_layout as usize,
    ];
    fields.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, field| {
        (hash ^ *field as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Latency model of the dummy device: larger tiles are faster, with a deterministic jitter.
pub fn modeled_latency(config: &Configuration) -> core::time::Duration {
    let tile = (config.block.m * config.block.n) as u64;
    let jitter = config_hash(config) % 997;
    core::time::Duration::from_nanos(1_000_000 / tile.max(1) + 10 * jitter + 1_000)
}

pub fn matmul_graph(m: usize, n: usize, k: usize) -> Arc<OperatorGraph> {
    let stage = Stage::Matmul(Matmul::new(m, n, k, ElemType::F16));
    Arc::new(OperatorGraph::fused(format!("matmul_{m}_{n}_{k}"), vec![stage]).unwrap())
}

pub fn a100() -> Arc<HardwareProfile> {
    Arc::new(HardwareProfile::a100())
}

/// Options for fast tests: few workers, no warm-up, no persistence.
pub fn test_options() -> TuneOptions {
    let mut options = TuneOptions::default();
    options.build.workers = Some(4);
    options.profile.warmup = 1;
    options.profile.samples = 3;
    options
}

pub fn test_logger() -> Logger {
    Logger::from_config(Arc::new(GlobalConfig::default()))
}

/// The single output every dummy kernel produces.
pub fn expected_output() -> TensorData {
    TensorData::from_f32([4], &[1.0, 2.0, 3.0, 4.0]).unwrap()
}

pub fn workload_with_reference(graph: &OperatorGraph) -> Workload {
    Workload::zeros(graph).with_reference(Reference::new(
        vec![expected_output()],
        Tolerance::new(1e-3, 1e-3),
    ))
}
