use core::time::Duration;
use hashbrown::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tilecraft_ir::{HardwareProfile, OperatorGraph};

use super::{
    BuildOptions, CacheKey, CandidateCompiler, CandidateError, CandidateResult, ConfigPolicy,
    Configuration, DefaultPolicy, DeviceLocks, KernelRuntime, Pass, ProfileOptions, SearchSummary,
    Throughput, TuneCache, TuneCacheResult, TuneError, TuneOutcome, Workload, build_all,
    compute_checksum, profile_all, select,
};
use crate::config::{GlobalConfig, Logger, autotune::AutotuneLogLevel};
use crate::id::CandidateId;

/// Explicit settings of a [Tuner].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuneOptions {
    /// Limits of the build pool.
    pub build: BuildOptions,
    /// How candidates are measured.
    pub profile: ProfileOptions,
    /// Number of broad candidates seeding the narrow pass.
    pub seed_count: usize,
    /// Whether accepted results are written to disk and read back by later runs.
    pub persist: bool,
    /// Directory holding the persistent cache.
    pub cache_root: PathBuf,
}

impl TuneOptions {
    /// Options described by a global configuration.
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            build: BuildOptions {
                workers: config.build.workers,
                compile_timeout: Duration::from_millis(config.build.compile_timeout_ms),
                load_retries: config.build.load_retries,
            },
            profile: ProfileOptions {
                warmup: config.profiling.warmup,
                samples: config.profiling.samples.max(1),
                timeout: Duration::from_millis(config.profiling.timeout_ms),
            },
            seed_count: config.autotune.seed_count,
            persist: config.autotune.persist,
            cache_root: config.autotune.cache.root(),
        }
    }
}

impl Default for TuneOptions {
    /// Default configuration values, without persistence.
    fn default() -> Self {
        Self {
            persist: false,
            ..Self::from_config(&GlobalConfig::default())
        }
    }
}

/// The best configurations seen so far, and every configuration already evaluated.
///
/// Threaded from the broad pass into the narrow pass.
#[derive(Debug, Clone, Default)]
pub struct SeedSet {
    capacity: usize,
    seeds: Vec<(Duration, usize, Configuration)>,
    evaluated: HashSet<Configuration>,
}

impl SeedSet {
    /// Keep at most `capacity` seeds.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seeds: Vec::new(),
            evaluated: HashSet::new(),
        }
    }

    /// Record the results of a pass.
    pub fn absorb<A, K>(&mut self, results: &[CandidateResult<A, K>]) {
        for result in results {
            self.evaluated.insert(result.config);
            if result.is_viable() {
                self.seeds.push((result.latency, result.index, result.config));
            }
        }
        self.seeds.sort_by_key(|(latency, index, _)| (*latency, *index));
        self.seeds.truncate(self.capacity);
    }

    /// Seed configurations, fastest first.
    pub fn configs(&self) -> Vec<Configuration> {
        self.seeds.iter().map(|(_, _, config)| *config).collect()
    }

    /// Whether a configuration was already evaluated.
    pub fn contains(&self, config: &Configuration) -> bool {
        self.evaluated.contains(config)
    }

    /// Number of seeds.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Whether no candidate was viable so far.
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

/// Searches, builds, measures and selects kernel candidates for operator graphs.
///
/// A tuner owns the cache of accepted outcomes; a problem already tuned by this tuner is
/// answered without compiling anything.
pub struct Tuner<C, R, P = DefaultPolicy>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
    P: ConfigPolicy,
{
    name: String,
    compiler: Arc<C>,
    runtime: Arc<R>,
    policy: P,
    options: TuneOptions,
    tune_cache: TuneCache<C::Artifact, R::Kernel>,
    locks: Arc<DeviceLocks>,
    logger: Logger,
}

impl<C, R> Tuner<C, R, DefaultPolicy>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
{
    /// Tuner with the default policy.
    pub fn new(name: &str, compiler: Arc<C>, runtime: Arc<R>, options: TuneOptions) -> Self {
        Self::with_policy(name, compiler, runtime, DefaultPolicy::default(), options)
    }

    /// Tuner with the default policy and the global configuration.
    pub fn from_config(name: &str, compiler: Arc<C>, runtime: Arc<R>) -> Self {
        let config = GlobalConfig::get();
        let options = TuneOptions::from_config(&config);
        Self::new(name, compiler, runtime, options).with_logger(Logger::from_config(config))
    }
}

impl<C, R, P> Tuner<C, R, P>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
    P: ConfigPolicy,
{
    /// Tuner with a custom policy.
    pub fn with_policy(
        name: &str,
        compiler: Arc<C>,
        runtime: Arc<R>,
        policy: P,
        options: TuneOptions,
    ) -> Self {
        let checksum = compute_checksum(&policy.name(), &compiler.name());
        let tune_cache = match options.persist {
            true => TuneCache::new(name, &runtime.device_id(), &options.cache_root, checksum),
            false => TuneCache::in_memory(checksum),
        };

        Self {
            name: name.to_string(),
            compiler,
            runtime,
            policy,
            options,
            tune_cache,
            locks: DeviceLocks::shared(),
            logger: Logger::new(),
        }
    }

    /// Replace the logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Serialize measurements with the tuners holding `locks` instead of the whole process.
    pub fn with_device_locks(mut self, locks: Arc<DeviceLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Settings of the tuner.
    pub fn options(&self) -> &TuneOptions {
        &self.options
    }

    /// The configuration policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Accepted outcomes.
    pub fn cache(&self) -> &TuneCache<C::Artifact, R::Kernel> {
        &self.tune_cache
    }

    /// Build and measure up to `count` configurations and select the fastest.
    ///
    /// Runs a single broad pass and doesn't touch the cache.
    pub fn search(
        &mut self,
        graph: &Arc<OperatorGraph>,
        hardware: &Arc<HardwareProfile>,
        workload: &Workload,
        count: usize,
    ) -> Result<TuneOutcome<C::Artifact, R::Kernel>, TuneError> {
        let configs = self.policy.emit_config(graph, hardware, count)?;
        let results = self.evaluate(graph, hardware, workload, configs, Pass::Broad, 0);

        self.accept(graph, hardware, results, 1)
    }

    /// Broad search followed by a narrow search around the best broad candidates.
    ///
    /// The selected candidate is the fastest of both passes, so it's never slower than the best
    /// of the broad pass. A problem already tuned by this tuner returns the cached outcome
    /// without building anything.
    pub fn finetune(
        &mut self,
        graph: &Arc<OperatorGraph>,
        hardware: &Arc<HardwareProfile>,
        workload: &Workload,
        broad_count: usize,
        narrow_count: usize,
    ) -> Result<Arc<TuneOutcome<C::Artifact, R::Kernel>>, TuneError> {
        let key = CacheKey {
            fingerprint: graph.fingerprint(),
            hardware: hardware.name().to_string(),
        };

        match self.tune_cache.try_cache(&key) {
            TuneCacheResult::Hit(outcome) => {
                log::debug!("Cache hit for {} on {}", graph.name(), hardware.name());
                return Ok(outcome);
            }
            TuneCacheResult::Warm(config) => {
                let results =
                    self.evaluate(graph, hardware, workload, vec![config], Pass::Cache, 0);
                match results.iter().any(CandidateResult::is_viable) {
                    true => {
                        let outcome = Arc::new(self.accept(graph, hardware, results, 1)?);
                        self.tune_cache.insert(key, outcome.clone());
                        return Ok(outcome);
                    }
                    false => log::warn!(
                        "Cached configuration {config} of {} isn't viable anymore, searching again",
                        graph.name()
                    ),
                }
            }
            TuneCacheResult::Miss => {}
        }

        let mut seeds = SeedSet::new(self.options.seed_count);
        let configs = self.policy.emit_config(graph, hardware, broad_count)?;
        let mut results = self.evaluate(graph, hardware, workload, configs, Pass::Broad, 0);
        seeds.absorb(&results);
        let mut passes = 1;

        if narrow_count > 0 && !seeds.is_empty() {
            let configs: Vec<Configuration> = self
                .policy
                .emit_config_around(graph, hardware, &seeds.configs(), narrow_count)?
                .into_iter()
                .filter(|config| !seeds.contains(config))
                .collect();
            log::debug!(
                "Narrow pass of {} around {} seeds",
                configs.len(),
                seeds.len()
            );

            let offset = results.len();
            let narrow = self.evaluate(graph, hardware, workload, configs, Pass::Narrow, offset);
            seeds.absorb(&narrow);
            results.extend(narrow);
            passes += 1;
        }

        let outcome = Arc::new(self.accept(graph, hardware, results, passes)?);
        self.tune_cache.insert(key, outcome.clone());
        self.persist();

        Ok(outcome)
    }

    fn persist(&self) {
        if !self.options.persist {
            return;
        }

        cfg_if::cfg_if! {
            if #[cfg(feature = "persistent-cache")] {
                if let Err(err) = self.tune_cache.save() {
                    log::warn!("Unable to save autotune cache ({err}).");
                }
            }
        }
    }

    fn evaluate(
        &mut self,
        graph: &Arc<OperatorGraph>,
        hardware: &Arc<HardwareProfile>,
        workload: &Workload,
        configs: Vec<Configuration>,
        pass: Pass,
        offset: usize,
    ) -> Vec<CandidateResult<C::Artifact, R::Kernel>> {
        let mut candidates = Vec::with_capacity(configs.len());
        let mut pruned = Vec::new();

        for (index, config) in configs.into_iter().enumerate() {
            let name = format!("{}_{}", self.name, CandidateId::new());
            let mut candidate = CandidateResult::pending(offset + index, pass, config, name);
            match self.policy.validate(graph, hardware, &config) {
                Ok(()) => candidates.push(candidate),
                Err(reason) => {
                    candidate.fail(CandidateError::InvalidConfiguration(reason));
                    pruned.push(candidate);
                }
            }
        }

        let mut results = build_all(
            &self.compiler,
            &self.runtime,
            graph,
            hardware,
            candidates,
            &self.options.build,
            &mut self.logger,
        );
        profile_all(
            &self.runtime,
            &mut results,
            workload,
            &self.options.profile,
            self.locks.as_ref(),
            &mut self.logger,
        );

        results.extend(pruned);
        results.sort_by_key(|result| result.index);
        results
    }

    fn accept(
        &mut self,
        graph: &OperatorGraph,
        hardware: &HardwareProfile,
        results: Vec<CandidateResult<C::Artifact, R::Kernel>>,
        passes: usize,
    ) -> Result<TuneOutcome<C::Artifact, R::Kernel>, TuneError> {
        let summary = SearchSummary::new(graph.name(), hardware.name(), &results);

        let Some(position) = select(&results) else {
            self.logger.log_autotune(&format!(
                "No viable candidate for {} on {}\n{summary}",
                graph.name(),
                hardware.name()
            ));
            return Err(TuneError::NoViableCandidate { summary });
        };

        let best = results[position].clone();
        let throughput = Throughput::new(
            graph.flops(),
            best.latency,
            hardware,
            best.config.use_tensor_core,
        );

        match self.logger.log_level_autotune() {
            AutotuneLogLevel::Disabled => {}
            AutotuneLogLevel::Minimal => self.logger.log_autotune(&format!(
                "Fastest candidate for {} is {} ({}): {throughput}",
                graph.name(),
                best.name,
                best.config
            )),
            AutotuneLogLevel::Full => {
                self.logger.log_autotune(&summary);
                self.logger.log_autotune(&format!(
                    "Fastest candidate for {} is {} ({}): {throughput}",
                    graph.name(),
                    best.name,
                    best.config
                ));
            }
        }

        Ok(TuneOutcome {
            best,
            summary,
            passes,
            throughput,
        })
    }
}
