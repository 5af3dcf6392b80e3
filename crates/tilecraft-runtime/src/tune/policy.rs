use hashbrown::HashSet;
use tilecraft_ir::{ElemType, GemmView, GraphError, HardwareProfile, OperatorGraph};
use tilecraft_quant::QuantLevel;

use super::{Configuration, Extents, TileShape, TuneError, WarpSplit, util::tile_options};

/// Enumerates the scheduling configurations worth building for a graph.
pub trait ConfigPolicy: Send + Sync + 'static {
    /// Identity of the policy, part of the persistent cache checksum.
    fn name(&self) -> String {
        core::any::type_name::<Self>().to_string()
    }

    /// Up to `count` distinct feasible configurations, best estimate first.
    ///
    /// Returns an empty list only when `count` is zero; a graph admitting no valid schedule is
    /// reported as [GraphError::EmptySearchSpace].
    fn emit_config(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        count: usize,
    ) -> Result<Vec<Configuration>, TuneError>;

    /// Up to `count` feasible perturbations of `seeds`, never a seed itself.
    ///
    /// Ordered by seed rank first, then by estimate. May be empty.
    fn emit_config_around(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        seeds: &[Configuration],
        count: usize,
    ) -> Result<Vec<Configuration>, TuneError>;

    /// Check that a configuration can run `graph` on `hardware`, with the reason when it can't.
    fn validate(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        config: &Configuration,
    ) -> Result<(), String>;
}

/// Roofline-based policy over power-of-two tiles.
///
/// Every configuration pads the problem to whole tiles and fits the shared memory, thread and
/// register limits of the target. Candidates are ranked by their roofline time divided by the
/// wave efficiency of their grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultPolicy {
    /// Largest block extent along `m` and `n`.
    pub max_tile: usize,
    /// Block extents along `k`.
    pub block_k: Vec<usize>,
    /// Warp counts along `m` and `n`.
    pub warp_splits: Vec<usize>,
    /// Vector widths of global loads.
    pub vector_widths: Vec<usize>,
    /// Numbers of pipeline stages.
    pub pipeline_stages: Vec<usize>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            max_tile: 256,
            block_k: vec![16, 32, 64, 128],
            warp_splits: vec![1, 2, 4],
            vector_widths: vec![8, 4, 2, 1],
            pipeline_stages: vec![1, 2, 3],
        }
    }
}

/// What the policy needs to know about a graph.
#[derive(Clone, Copy, Debug)]
struct Problem {
    gemm: GemmView,
    epilogue: usize,
    input_bits: usize,
    weight_bits: usize,
}

impl Problem {
    fn new(graph: &OperatorGraph) -> Option<Self> {
        let gemm = graph.gemm()?;
        Some(Self {
            gemm,
            epilogue: graph.epilogue_len(),
            input_bits: gemm.dtype.size_bits(),
            weight_bits: gemm.weight_bits(),
        })
    }

    fn padded(&self, block: &TileShape) -> Extents {
        Extents::padded(self.gemm.m, self.gemm.n, self.gemm.k, block)
    }
}

fn empty_search_space(graph: &OperatorGraph, hardware: &HardwareProfile) -> TuneError {
    TuneError::Graph(GraphError::EmptySearchSpace {
        graph: graph.fingerprint().key,
        hardware: hardware.name().to_string(),
    })
}

impl ConfigPolicy for DefaultPolicy {
    fn name(&self) -> String {
        format!("{self:?}")
    }

    fn emit_config(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        count: usize,
    ) -> Result<Vec<Configuration>, TuneError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let problem = Problem::new(graph).ok_or_else(|| empty_search_space(graph, hardware))?;

        let mut ranked: Vec<(f64, Configuration)> = self
            .enumerate(&problem, hardware)
            .into_iter()
            .map(|config| (self.estimate(&problem, hardware, &config), config))
            .collect();
        ranked.sort_by(|(a, config_a), (b, config_b)| {
            a.total_cmp(b).then_with(|| config_a.cmp(config_b))
        });
        ranked.dedup_by(|a, b| a.1 == b.1);

        if ranked.is_empty() {
            return Err(empty_search_space(graph, hardware));
        }

        log::debug!(
            "{} feasible configurations for {}, keeping {}",
            ranked.len(),
            graph.name(),
            count.min(ranked.len())
        );

        Ok(ranked
            .into_iter()
            .take(count)
            .map(|(_, config)| config)
            .collect())
    }

    fn emit_config_around(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        seeds: &[Configuration],
        count: usize,
    ) -> Result<Vec<Configuration>, TuneError> {
        if count == 0 || seeds.is_empty() {
            return Ok(Vec::new());
        }
        let problem = Problem::new(graph).ok_or_else(|| empty_search_space(graph, hardware))?;

        let mut seen: HashSet<Configuration> = seeds.iter().copied().collect();
        let mut configs = Vec::new();

        for seed in seeds {
            let mut neighbors: Vec<(f64, Configuration)> = self
                .neighbors(&problem, seed)
                .into_iter()
                .filter(|config| self.check(&problem, hardware, config).is_ok())
                .filter(|config| seen.insert(*config))
                .map(|config| (self.estimate(&problem, hardware, &config), config))
                .collect();
            neighbors.sort_by(|(a, config_a), (b, config_b)| {
                a.total_cmp(b).then_with(|| config_a.cmp(config_b))
            });
            configs.extend(neighbors.into_iter().map(|(_, config)| config));

            if configs.len() >= count {
                break;
            }
        }

        configs.truncate(count);
        Ok(configs)
    }

    fn validate(
        &self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        config: &Configuration,
    ) -> Result<(), String> {
        let problem = Problem::new(graph).ok_or("graph has no matrix multiplication stage")?;
        self.check(&problem, hardware, config)
    }
}

impl DefaultPolicy {
    fn enumerate(&self, problem: &Problem, hardware: &HardwareProfile) -> Vec<Configuration> {
        let gemm = &problem.gemm;
        let mut configs = Vec::new();

        for use_tensor_core in [true, false] {
            let (min_m, min_n) = match (use_tensor_core, hardware.tensor_core()) {
                (true, Some(fragment)) => (fragment.m, fragment.n),
                (true, None) => continue,
                (false, _) => (
                    16usize.min(gemm.m.next_power_of_two()),
                    16usize.min(gemm.n.next_power_of_two()),
                ),
            };
            let max_k = 16usize.max(gemm.k.next_power_of_two());

            for bm in tile_options(gemm.m, min_m, self.max_tile) {
                for bn in tile_options(gemm.n, min_n, self.max_tile) {
                    for &bk in self.block_k.iter().filter(|bk| **bk <= max_k) {
                        let block = TileShape::new(bm, bn, bk);
                        self.enumerate_block(
                            problem,
                            hardware,
                            block,
                            use_tensor_core,
                            &mut configs,
                        );
                    }
                }
            }
        }

        configs
    }

    fn enumerate_block(
        &self,
        problem: &Problem,
        hardware: &HardwareProfile,
        block: TileShape,
        use_tensor_core: bool,
        configs: &mut Vec<Configuration>,
    ) {
        let padded = problem.padded(&block);

        for &wm in self.warp_splits.iter() {
            for &wn in self.warp_splits.iter() {
                for &vectorize in self.vector_widths.iter() {
                    for &pipeline_stages in self.pipeline_stages.iter() {
                        for (propagate_input_layout, propagate_weight_layout) in
                            [(true, true), (true, false), (false, true), (false, false)]
                        {
                            let config = Configuration {
                                block,
                                warp: WarpSplit::new(wm, wn),
                                padded,
                                vectorize,
                                pipeline_stages,
                                use_tensor_core,
                                fuse_epilogue: problem.epilogue > 0,
                                propagate_input_layout,
                                propagate_weight_layout,
                            };

                            if self.check(problem, hardware, &config).is_ok() {
                                configs.push(config);
                            }
                        }
                    }
                }
            }
        }
    }

    fn check(
        &self,
        problem: &Problem,
        hardware: &HardwareProfile,
        config: &Configuration,
    ) -> Result<(), String> {
        let gemm = &problem.gemm;
        let block = &config.block;

        if block.m == 0 || block.n == 0 || block.k == 0 {
            return Err("empty block".into());
        }
        if config.warp.m == 0 || config.warp.n == 0 {
            return Err("empty warp split".into());
        }
        if config.vectorize == 0 || config.pipeline_stages == 0 {
            return Err("zero vector width or pipeline depth".into());
        }
        if config.padded != problem.padded(block) {
            return Err(format!("padded extents {:?} don't match the block", config.padded));
        }
        if block.m % config.warp.m != 0 || block.n % config.warp.n != 0 {
            return Err("warps don't divide the block".into());
        }
        if block.k % config.vectorize != 0 || gemm.k % config.vectorize != 0 {
            return Err(format!("vector width {} doesn't divide k", config.vectorize));
        }

        if config.use_tensor_core {
            let fragment = hardware
                .tensor_core()
                .ok_or("the target has no tensor core")?;
            if !matches!(gemm.dtype, ElemType::F16 | ElemType::BF16) {
                return Err(format!("tensor cores don't support {}", gemm.dtype));
            }
            let (warp_m, warp_n) = config.warp_tile();
            if block.k % fragment.k != 0 || warp_m % fragment.m != 0 || warp_n % fragment.n != 0 {
                return Err("warp tile isn't a multiple of the fragment".into());
            }
        }

        if let Some(scheme) = &gemm.quant {
            if (block.k * scheme.size_bits_value()) % scheme.size_bits_stored() != 0 {
                return Err("block k doesn't fill whole storage elements".into());
            }
            if let QuantLevel::Block(group) = scheme.level {
                if block.k % group != 0 && group % block.k != 0 {
                    return Err(format!("block k {} doesn't align with groups of {group}", block.k));
                }
            }
        }

        if config.fuse_epilogue && problem.epilogue == 0 {
            return Err("no epilogue to fuse".into());
        }
        if config.propagate_input_layout && !(gemm.allow_propagate_a && config.use_tensor_core) {
            return Err("input layout propagation isn't allowed".into());
        }
        if config.propagate_weight_layout && !(gemm.allow_propagate_b && config.use_tensor_core) {
            return Err("weight layout propagation isn't allowed".into());
        }

        let threads = config.threads(hardware.warp_size());
        if threads > hardware.max_threads_per_block() {
            return Err(format!("{threads} threads per block"));
        }
        let shared_memory = config.shared_memory(problem.input_bits, problem.weight_bits);
        if shared_memory > hardware.max_shared_memory_per_block() {
            return Err(format!("{shared_memory} bytes of shared memory"));
        }
        let registers = config.registers_per_thread(hardware.warp_size());
        if registers > hardware.max_registers_per_thread() {
            return Err(format!("{registers} registers per thread"));
        }
        if hardware.blocks_per_sm(threads, shared_memory, registers) == 0 {
            return Err("a block doesn't fit on a streaming multiprocessor".into());
        }

        Ok(())
    }

    /// Estimated execution time in seconds.
    fn estimate(
        &self,
        problem: &Problem,
        hardware: &HardwareProfile,
        config: &Configuration,
    ) -> f64 {
        let padded = &config.padded;
        let block = &config.block;
        let grid = config.grid() as f64;
        let input_bytes = problem.input_bits as f64 / 8.0;
        let weight_bytes = problem.weight_bits as f64 / 8.0;

        let flops = 2.0 * padded.m as f64 * padded.n as f64 * padded.k as f64;
        let compute = flops / hardware.peak(config.use_tensor_core);

        let output = (padded.m * padded.n) as f64 * input_bytes;
        let unfused = match config.fuse_epilogue {
            true => 0.0,
            false => 2.0 * problem.epilogue as f64 * output,
        };
        let traffic = grid
            * (block.m as f64 * padded.k as f64 * input_bytes
                + block.n as f64 * padded.k as f64 * weight_bytes)
            + output
            + unfused;
        let mut memory = traffic / hardware.memory_bandwidth();
        memory /= 0.5 + 0.5 * (config.vectorize.min(8) as f64 / 8.0);
        if config.propagate_input_layout {
            memory *= 0.95;
        }
        if config.propagate_weight_layout {
            memory *= 0.95;
        }

        let latency_hiding = match config.pipeline_stages {
            1 => 1.3,
            2 => 1.1,
            _ => 1.0,
        };

        let threads = config.threads(hardware.warp_size());
        let shared_memory = config.shared_memory(problem.input_bits, problem.weight_bits);
        let registers = config.registers_per_thread(hardware.warp_size());
        let slots = (hardware.blocks_per_sm(threads, shared_memory, registers)
            * hardware.num_streaming_multiprocessors())
            .max(1) as f64;
        let waves = (grid / slots).ceil();
        let wave_efficiency = grid / (waves * slots);

        compute.max(memory) * latency_hiding / wave_efficiency
    }

    fn neighbors(&self, problem: &Problem, seed: &Configuration) -> Vec<Configuration> {
        let mut neighbors = Vec::new();
        let with_block = |block: TileShape| Configuration {
            block,
            padded: problem.padded(&block),
            ..*seed
        };
        let block = seed.block;

        if block.m > 1 {
            neighbors.push(with_block(TileShape { m: block.m / 2, ..block }));
        }
        neighbors.push(with_block(TileShape { m: block.m * 2, ..block }));
        if block.n > 1 {
            neighbors.push(with_block(TileShape { n: block.n / 2, ..block }));
        }
        neighbors.push(with_block(TileShape { n: block.n * 2, ..block }));
        if block.k > 1 {
            neighbors.push(with_block(TileShape { k: block.k / 2, ..block }));
        }
        neighbors.push(with_block(TileShape { k: block.k * 2, ..block }));

        for &m in self.warp_splits.iter() {
            for &n in self.warp_splits.iter() {
                neighbors.push(Configuration {
                    warp: WarpSplit::new(m, n),
                    ..*seed
                });
            }
        }
        for &vectorize in self.vector_widths.iter() {
            neighbors.push(Configuration { vectorize, ..*seed });
        }
        for &pipeline_stages in self.pipeline_stages.iter() {
            neighbors.push(Configuration {
                pipeline_stages,
                ..*seed
            });
        }

        neighbors.push(Configuration {
            fuse_epilogue: !seed.fuse_epilogue,
            ..*seed
        });
        neighbors.push(Configuration {
            propagate_input_layout: !seed.propagate_input_layout,
            ..*seed
        });
        neighbors.push(Configuration {
            propagate_weight_layout: !seed.propagate_weight_layout,
            ..*seed
        });
        neighbors.push(Configuration {
            use_tensor_core: !seed.use_tensor_core,
            propagate_input_layout: false,
            propagate_weight_layout: false,
            ..*seed
        });

        neighbors
            .into_iter()
            .filter(|config| config != seed)
            .collect()
    }
}
