mod dummy;

use core::time::Duration;
use dummy::*;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use std::time::Instant;
use tilecraft_ir::{Conv2d, DequantizeMatmul, ElemType, OperatorGraph, Stage, TensorData};
use tilecraft_quant::{
    QuantBits, QuantScheme, QuantizedWeight, SourceFormat, WeightTransform, permute_and_pack,
    unpack,
};
use tilecraft_runtime::tune::{
    CandidateError, CompilationError, ConfigPolicy, Configuration, DefaultPolicy, DeviceLocks,
    LoadError, Pass, Reference, TimeoutPhase, Tolerance, TuneError, TuneOptions, Tuner, Workload,
};

type DummyTuner = Tuner<DummyCompiler, DummyRuntime>;

fn tuner(name: &str, compiler: &Arc<DummyCompiler>, runtime: &Arc<DummyRuntime>) -> DummyTuner {
    tuner_with_options(name, compiler, runtime, test_options())
}

fn tuner_with_options(
    name: &str,
    compiler: &Arc<DummyCompiler>,
    runtime: &Arc<DummyRuntime>,
    options: TuneOptions,
) -> DummyTuner {
    Tuner::new(name, compiler.clone(), runtime.clone(), options).with_logger(test_logger())
}

fn emitted(graph: &OperatorGraph, count: usize) -> Vec<Configuration> {
    DefaultPolicy::default()
        .emit_config(graph, &a100(), count)
        .unwrap()
}

fn fault_of(config: &Configuration) -> Option<BuildFault> {
    match config_hash(config) % 5 {
        0 => Some(BuildFault::Error),
        1 => Some(BuildFault::Panic),
        _ => Some(BuildFault::Sleep(Duration::from_millis(config_hash(config) % 15))),
    }
}

#[test_log::test]
fn results_follow_emission_order_under_induced_failures() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::with_faults(fault_of));
    let runtime = Arc::new(DummyRuntime::new("gpu:ordering"));
    let mut tuner = tuner("ordering", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 24)
        .unwrap();

    let expected = emitted(&graph, 24);
    let entries = &outcome.summary.entries;
    assert_eq!(entries.len(), expected.len());

    for (position, (entry, config)) in entries.iter().zip(expected.iter()).enumerate() {
        assert_eq!(entry.index, position);
        assert_eq!(&entry.config, config);
        assert_eq!(entry.pass, Pass::Broad);

        match fault_of(config) {
            Some(BuildFault::Error) => assert!(matches!(
                entry.error,
                Some(CandidateError::Build(CompilationError::Generation(_)))
            )),
            Some(BuildFault::Panic) => match &entry.error {
                Some(CandidateError::Panicked(msg)) => assert!(msg.contains("Compiler crashed")),
                other => panic!("Expected a panic, got {other:?}"),
            },
            _ => {
                assert_eq!(entry.error, None);
                assert_eq!(entry.latency, modeled_latency(config));
            }
        }
    }
}

#[test_log::test]
fn every_build_gets_a_unique_name() {
    let graph = matmul_graph(128, 128, 128);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:unique"));
    let mut tuner = tuner("unique", &compiler, &runtime);

    tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 16)
        .unwrap();

    let mut names = compiler.names();
    let count = names.len();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), count);
    assert!(names.iter().all(|name| name.starts_with("unique_")));
}

#[test_log::test]
fn selects_the_fastest_viable_candidate() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::with_faults(fault_of));
    let runtime = Arc::new(DummyRuntime::new("gpu:select"));
    let mut tuner = tuner("select", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 24)
        .unwrap();

    let expected = outcome
        .summary
        .entries
        .iter()
        .filter(|entry| entry.is_viable())
        .min_by_key(|entry| (entry.latency, entry.index))
        .unwrap();
    assert_eq!(outcome.best.index, expected.index);
    assert_eq!(outcome.best.latency, expected.latency);
    assert!(outcome.best.kernel.is_some());
    assert_eq!(outcome.summary.best(), Some(outcome.best.latency));
}

#[test_log::test]
fn equal_latencies_select_the_earliest_candidate() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime =
        Arc::new(DummyRuntime::new("gpu:ties").with_latency(|_| Duration::from_micros(42)));
    let mut tuner = tuner("ties", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 12)
        .unwrap();

    assert_eq!(outcome.best.index, 0);
}

#[test_log::test]
fn top1_is_the_first_viable_candidate() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::with_faults(fault_of));
    let runtime = Arc::new(DummyRuntime::new("gpu:top1"));
    let mut tuner = tuner("top1", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 24)
        .unwrap();

    let first_viable = emitted(&graph, 24)
        .into_iter()
        .find(|config| !matches!(fault_of(config), Some(BuildFault::Error | BuildFault::Panic)))
        .unwrap();
    assert_eq!(outcome.summary.top1(), Some(modeled_latency(&first_viable)));
    assert!(outcome.summary.top1() >= outcome.summary.best());
}

#[test_log::test]
fn finetune_is_never_worse_than_the_broad_pass() {
    let graph = matmul_graph(512, 512, 512);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:finetune"));
    let mut tuner = tuner("finetune", &compiler, &runtime);

    let outcome = tuner
        .finetune(&graph, &a100(), &Workload::zeros(&graph), 12, 12)
        .unwrap();

    let entries = &outcome.summary.entries;
    let broad: Vec<_> = entries.iter().filter(|e| e.pass == Pass::Broad).collect();
    let narrow: Vec<_> = entries.iter().filter(|e| e.pass == Pass::Narrow).collect();
    let broad_best = broad
        .iter()
        .filter(|entry| entry.is_viable())
        .map(|entry| entry.latency)
        .min()
        .unwrap();

    assert_eq!(outcome.passes, 2);
    assert_eq!(broad.len(), 12);
    assert!(!narrow.is_empty());
    assert!(outcome.best.latency <= broad_best);
    for entry in narrow {
        assert!(entry.index >= broad.len());
        assert!(broad.iter().all(|b| b.config != entry.config));
    }
}

#[test_log::test]
fn searches_are_deterministic() {
    let graph = matmul_graph(384, 256, 128);
    let run = || {
        let compiler = Arc::new(DummyCompiler::with_faults(fault_of));
        let runtime = Arc::new(DummyRuntime::new("gpu:determinism"));
        let outcome = tuner("determinism", &compiler, &runtime)
            .finetune(&graph, &a100(), &Workload::zeros(&graph), 10, 6)
            .unwrap();
        let entries: Vec<_> = outcome
            .summary
            .entries
            .iter()
            .map(|entry| (entry.index, entry.pass, entry.config, entry.latency))
            .collect();
        (entries, outcome.best.config)
    };

    assert_eq!(run(), run());
}

#[test_log::test]
fn quantized_matmul_single_row() {
    let scheme = QuantScheme::default().with_bits(QuantBits::B4);
    let stage = DequantizeMatmul::new(1, 1024, 1024, ElemType::F16, scheme, false, false, true);
    let graph = Arc::new(
        OperatorGraph::fused("dequant_gemv", vec![Stage::DequantizeMatmul(stage)]).unwrap(),
    );
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:quant"));
    let mut tuner = tuner("quant", &compiler, &runtime);

    let outcome = tuner
        .finetune(&graph, &a100(), &Workload::zeros(&graph), 16, 8)
        .unwrap();

    let config = outcome.best.config;
    assert!(config.padded.m >= 1);
    assert_eq!(config.padded.m % config.block.m, 0);
    assert_eq!(config.padded.n, 1024);
    assert_eq!(config.padded.k, 1024);
    assert_eq!(outcome.throughput.flops, 2 * 1024 * 1024);

    let mut rng = StdRng::seed_from_u64(1024);
    let (min, max) = scheme.value_range();
    let values = (0..1024 * 1024).map(|_| rng.random_range(min..=max)).collect();
    let weight = QuantizedWeight::new(1024, 1024, values).unwrap();
    let transform = WeightTransform::new(scheme.with_fast_decoding(true), true);

    let packed = permute_and_pack(&weight, &transform).unwrap();
    assert_eq!(packed.bytes.len(), 1024 * 1024 / 2);
    assert_eq!(unpack(&packed, &transform).unwrap(), weight);
}

#[test_log::test]
fn broad_search_over_a_row_major_quantized_weight() {
    let scheme = QuantScheme::default()
        .with_bits(QuantBits::B4)
        .with_source(SourceFormat::Uint)
        .with_scaling(false);
    let stage = DequantizeMatmul::new(1, 1024, 1024, ElemType::F16, scheme, false, false, false);
    let graph = Arc::new(
        OperatorGraph::fused("dequant_gemv_nt", vec![Stage::DequantizeMatmul(stage)]).unwrap(),
    );
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:row_major"));
    let mut tuner = tuner("row_major", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 20)
        .unwrap();

    let entries = &outcome.summary.entries;
    assert!((1..=20).contains(&entries.len()));
    assert!(entries.iter().all(|entry| !entry.config.propagate_weight_layout));
    assert_eq!(outcome.throughput.flops, 2 * 1024 * 1024);
}

#[test_log::test]
fn packed_weight_follows_the_layout_of_each_candidate() {
    let scheme = QuantScheme::default()
        .with_bits(QuantBits::B4)
        .with_fast_decoding(true);
    let stage = DequantizeMatmul::new(16, 256, 256, ElemType::F16, scheme, false, false, true);
    let graph = Arc::new(
        OperatorGraph::fused("dequant_decode", vec![Stage::DequantizeMatmul(stage)]).unwrap(),
    );
    let fragment = emitted(&graph, 64)
        .into_iter()
        .find(|config| config.use_tensor_core && config.propagate_weight_layout)
        .unwrap();
    let row_major = Configuration {
        propagate_weight_layout: false,
        ..fragment
    };

    let mut rng = StdRng::seed_from_u64(256);
    let (min, max) = scheme.value_range();
    let values: Vec<i16> = (0..256 * 256).map(|_| rng.random_range(min..=max)).collect();
    let expected: Vec<f32> = values[..DECODED_VALUES].iter().map(|v| *v as f32).collect();
    let weight = QuantizedWeight::new(256, 256, values).unwrap();
    let workload = Workload::zeros(&graph)
        .with_quantized_weight(&graph, &weight)
        .unwrap()
        .with_reference(Reference::new(
            vec![TensorData::from_f32([DECODED_VALUES], &expected).unwrap()],
            Tolerance::new(0.0, 0.0),
        ));

    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:decode").with_weight_decoder(1, scheme));
    let policy = FixedPolicy(vec![fragment, row_major]);
    let outcome = Tuner::with_policy("decode", compiler, runtime, policy, test_options())
        .with_logger(test_logger())
        .search(&graph, &a100(), &workload, 2)
        .unwrap();

    let entries = &outcome.summary.entries;
    assert_eq!(entries.len(), 2);
    for (entry, propagated) in entries.iter().zip([true, false]) {
        assert_eq!(entry.error, None);
        assert_eq!(entry.config.propagate_weight_layout, propagated);
    }
}

#[test_log::test]
fn conv_epilogue_throughput() {
    let conv = Conv2d::new(128, 512, 7, 7, 2048, 1, 1, 1, 1, 0, ElemType::F16);
    let shape = vec![128, 7, 7, 2048];
    let graph = Arc::new(
        OperatorGraph::fused(
            "conv_bias_relu",
            vec![
                Stage::Conv2d(conv),
                Stage::BiasAdd {
                    shape: shape.clone(),
                    dtype: ElemType::F16,
                },
                Stage::Relu {
                    shape,
                    dtype: ElemType::F16,
                },
            ],
        )
        .unwrap(),
    );
    let flops: u64 = 2 * 128 * 2048 * 7 * 7 * 512;
    assert_eq!(graph.flops(), flops);

    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:conv"));
    let hardware = a100();
    let outcome = tuner("conv", &compiler, &runtime)
        .search(&graph, &hardware, &Workload::zeros(&graph), 8)
        .unwrap();

    let throughput = outcome.throughput;
    let tflops = flops as f64 / outcome.best.latency.as_secs_f64() / 1e12;
    assert_eq!(throughput.flops, flops);
    assert!((throughput.tflops - tflops).abs() < 1e-6);
    let peak = hardware.peak(outcome.best.config.use_tensor_core) / 1e12;
    assert!((throughput.percent_of_peak - 100.0 * tflops / peak).abs() < 1e-6);
}

#[test_log::test]
fn no_viable_candidate_when_every_build_fails() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::with_faults(|_| Some(BuildFault::Error)));
    let runtime = Arc::new(DummyRuntime::new("gpu:failing"));
    let mut tuner = tuner("failing", &compiler, &runtime);

    let err = tuner
        .finetune(&graph, &a100(), &Workload::zeros(&graph), 10, 10)
        .unwrap_err();

    match err {
        TuneError::NoViableCandidate { summary } => {
            assert_eq!(summary.entries.len(), 10);
            assert_eq!(summary.num_viable(), 0);
            assert!(
                summary
                    .entries
                    .iter()
                    .all(|entry| matches!(entry.error, Some(CandidateError::Build(_))))
            );
        }
        err => panic!("Unexpected error {err}"),
    }
    assert_eq!(runtime.executions(), 0);
    assert!(tuner.cache().is_empty());
}

#[test_log::test]
fn cache_hit_skips_the_whole_pipeline() {
    let graph = matmul_graph(256, 256, 256);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:cached"));
    let mut tuner = tuner("cached", &compiler, &runtime);
    let workload = Workload::zeros(&graph);

    let first = tuner.finetune(&graph, &a100(), &workload, 8, 4).unwrap();
    let calls = compiler.calls();
    let executions = runtime.executions();

    let renamed = Arc::new(
        OperatorGraph::fused("same_problem", graph.stages().cloned().collect()).unwrap(),
    );
    let second = tuner.finetune(&renamed, &a100(), &workload, 8, 4).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(compiler.calls(), calls);
    assert_eq!(runtime.executions(), executions);
}

#[test_log::test]
fn stuck_build_times_out_without_blocking() {
    let graph = matmul_graph(256, 256, 256);
    let slow = emitted(&graph, 6)[1];
    let compiler = Arc::new(DummyCompiler::with_faults(move |config| {
        (*config == slow).then_some(BuildFault::Sleep(Duration::from_secs(3)))
    }));
    let runtime = Arc::new(DummyRuntime::new("gpu:stuck"));
    let mut options = test_options();
    options.build.workers = Some(2);
    options.build.compile_timeout = Duration::from_millis(200);
    let mut tuner = tuner_with_options("stuck", &compiler, &runtime, options);

    let start = Instant::now();
    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 6)
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(3));
    let entries = &outcome.summary.entries;
    assert_eq!(
        entries[1].error,
        Some(CandidateError::Timeout {
            phase: TimeoutPhase::Build,
            after: Duration::from_millis(200),
        })
    );
    assert_eq!(entries.iter().filter(|entry| entry.is_viable()).count(), 5);
}

#[test_log::test]
fn hung_kernel_times_out_during_profiling() {
    let graph = matmul_graph(256, 256, 256);
    let hung = emitted(&graph, 4)[0];
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:hung").with_stall(move |config, _| {
        match *config == hung {
            true => Duration::from_secs(1),
            false => Duration::ZERO,
        }
    }));
    let mut options = test_options();
    options.profile.timeout = Duration::from_millis(300);
    let mut tuner = tuner_with_options("hung", &compiler, &runtime, options);

    let start = Instant::now();
    let err = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 4)
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(3));
    match err {
        TuneError::NoViableCandidate { summary } => {
            assert_eq!(summary.entries.len(), 4);
            for entry in summary.entries.iter() {
                assert_eq!(
                    entry.error,
                    Some(CandidateError::Timeout {
                        phase: TimeoutPhase::Profile,
                        after: Duration::from_millis(300),
                    })
                );
            }
        }
        err => panic!("Unexpected error {err}"),
    }
    assert_eq!(runtime.max_in_flight(), 1);
}

#[test_log::test]
fn timed_out_kernel_keeps_the_device_until_it_returns() {
    let graph = matmul_graph(256, 256, 256);
    let slow = emitted(&graph, 4)[0];
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:slow").with_stall(move |config, run| {
        match *config == slow && run == 0 {
            true => Duration::from_millis(500),
            false => Duration::ZERO,
        }
    }));
    let mut options = test_options();
    options.profile.timeout = Duration::from_millis(350);
    let mut tuner = tuner_with_options("slow", &compiler, &runtime, options);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 4)
        .unwrap();

    let entries = &outcome.summary.entries;
    assert_eq!(entries.len(), 4);
    assert_eq!(
        entries[0].error,
        Some(CandidateError::Timeout {
            phase: TimeoutPhase::Profile,
            after: Duration::from_millis(350),
        })
    );
    assert!(entries[1..].iter().all(|entry| entry.is_viable()));
    assert_eq!(runtime.max_in_flight(), 1);
}

#[test_log::test]
fn tuners_sharing_a_device_never_overlap() {
    let graph = matmul_graph(256, 256, 256);
    let runtime =
        Arc::new(DummyRuntime::new("gpu:shared").with_stall(|_, _| Duration::from_millis(2)));

    std::thread::scope(|scope| {
        for name in ["left", "right"] {
            let graph = graph.clone();
            let runtime = runtime.clone();
            scope.spawn(move || {
                let compiler = Arc::new(DummyCompiler::new());
                tuner(name, &compiler, &runtime)
                    .search(&graph, &a100(), &Workload::zeros(&graph), 16)
                    .unwrap();
            });
        }
    });

    assert_eq!(runtime.max_in_flight(), 1);
}

#[test_log::test]
fn private_device_locks_let_tuners_overlap() {
    let graph = matmul_graph(128, 128, 128);
    let runtime =
        Arc::new(DummyRuntime::new("gpu:private").with_stall(|_, _| Duration::from_millis(50)));
    let barrier = std::sync::Barrier::new(2);

    std::thread::scope(|scope| {
        for name in ["left", "right"] {
            let graph = graph.clone();
            let runtime = runtime.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                let compiler = Arc::new(DummyCompiler::new());
                let mut tuner = tuner(name, &compiler, &runtime)
                    .with_device_locks(Arc::new(DeviceLocks::default()));
                barrier.wait();
                tuner
                    .search(&graph, &a100(), &Workload::zeros(&graph), 4)
                    .unwrap();
            });
        }
    });

    assert_eq!(runtime.max_in_flight(), 2);
}

#[test_log::test]
fn numeric_mismatch_is_never_selected() {
    let graph = matmul_graph(256, 256, 256);
    let configs = emitted(&graph, 16);
    let fastest = *configs
        .iter()
        .min_by_key(|config| modeled_latency(config))
        .unwrap();
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(
        DummyRuntime::new("gpu:numeric").with_wrong_output(move |config| *config == fastest),
    );
    let mut tuner = tuner("numeric", &compiler, &runtime);

    let outcome = tuner
        .search(&graph, &a100(), &workload_with_reference(&graph), 16)
        .unwrap();

    assert_ne!(outcome.best.config, fastest);
    let rejected = outcome
        .summary
        .entries
        .iter()
        .find(|entry| entry.config == fastest)
        .unwrap();
    assert_eq!(
        rejected.error,
        Some(CandidateError::NumericMismatch {
            output: 0,
            index: 2,
            expected: 3.0,
            actual: 4.0,
        })
    );
    assert!(!rejected.is_viable());
}

#[test_log::test]
fn load_is_retried() {
    let graph = matmul_graph(128, 128, 128);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:retry").with_load_failures(2));
    let mut options = test_options();
    options.build.workers = Some(1);
    let mut tuner = tuner_with_options("retry", &compiler, &runtime, options);

    let outcome = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 1)
        .unwrap();

    assert_eq!(runtime.loads(), 3);
    assert_eq!(outcome.best.index, 0);
}

#[test_log::test]
fn load_failures_past_the_retries_discard_the_candidate() {
    let graph = matmul_graph(128, 128, 128);
    let compiler = Arc::new(DummyCompiler::new());
    let runtime = Arc::new(DummyRuntime::new("gpu:no_retry").with_load_failures(2));
    let mut options = test_options();
    options.build.workers = Some(1);
    options.build.load_retries = 1;
    let mut tuner = tuner_with_options("no_retry", &compiler, &runtime, options);

    let err = tuner
        .search(&graph, &a100(), &Workload::zeros(&graph), 1)
        .unwrap_err();

    match err {
        TuneError::NoViableCandidate { summary } => assert!(matches!(
            summary.entries[0].error,
            Some(CandidateError::Load(LoadError::Device(_)))
        )),
        err => panic!("Unexpected error {err}"),
    }
}

#[test_log::test]
fn persistent_cache_warm_starts_a_new_tuner() {
    let root = std::env::temp_dir().join(format!("tilecraft-warm-start-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    let mut options = test_options();
    options.persist = true;
    options.cache_root = root.clone();

    let graph = matmul_graph(256, 256, 256);
    let workload = Workload::zeros(&graph);
    let runtime = Arc::new(DummyRuntime::new("gpu:persisted"));

    let compiler = Arc::new(DummyCompiler::new());
    let first = tuner_with_options("persisted", &compiler, &runtime, options.clone())
        .finetune(&graph, &a100(), &workload, 8, 4)
        .unwrap();

    let compiler = Arc::new(DummyCompiler::new());
    let mut warm = tuner_with_options("persisted", &compiler, &runtime, options.clone());
    let second = warm.finetune(&graph, &a100(), &workload, 8, 4).unwrap();

    assert_eq!(compiler.calls(), 1);
    assert_eq!(second.passes, 1);
    assert_eq!(second.best.pass, Pass::Cache);
    assert_eq!(second.best.config, first.best.config);

    let compiler = Arc::new(DummyCompiler::new());
    let policy = DefaultPolicy {
        max_tile: 128,
        ..Default::default()
    };
    let third = Tuner::with_policy("persisted", compiler.clone(), runtime.clone(), policy, options)
        .with_logger(test_logger())
        .finetune(&graph, &a100(), &workload, 8, 4)
        .unwrap();

    assert!(compiler.calls() > 1);
    assert_eq!(third.passes, 2);

    let _ = std::fs::remove_dir_all(&root);
}
