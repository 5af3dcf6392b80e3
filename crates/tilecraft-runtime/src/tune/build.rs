use core::time::Duration;
use hashbrown::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc,
};
use std::thread;
use std::time::Instant;
use tilecraft_ir::{HardwareProfile, OperatorGraph};

use super::{
    CandidateCompiler, CandidateError, CandidateResult, Configuration, KernelRuntime, TimeoutPhase,
    panic_message,
};
use crate::config::{Logger, build::BuildLogLevel};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Limits of the build pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Number of concurrent builds, the available parallelism when `None`.
    pub workers: Option<usize>,
    /// Time allowed to compile and load one candidate.
    pub compile_timeout: Duration,
    /// Extra attempts after a failed load.
    pub load_retries: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            workers: None,
            compile_timeout: Duration::from_secs(60),
            load_retries: 2,
        }
    }
}

impl BuildOptions {
    /// Number of workers to build `num_candidates` candidates.
    pub fn num_workers(&self, num_candidates: usize) -> usize {
        let available = self
            .workers
            .or_else(|| thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1);

        available.min(num_candidates)
    }
}

struct Built<A, K> {
    artifact: A,
    kernel: K,
    source: Option<String>,
}

enum Message<A, K> {
    Started {
        slot: usize,
        worker: usize,
    },
    Finished {
        slot: usize,
        outcome: Result<Built<A, K>, CandidateError>,
    },
}

struct Job {
    config: Configuration,
    name: String,
}

struct Shared<C: CandidateCompiler, R: KernelRuntime> {
    compiler: Arc<C>,
    runtime: Arc<R>,
    graph: Arc<OperatorGraph>,
    hardware: Arc<HardwareProfile>,
    jobs: Vec<Job>,
    next: AtomicUsize,
    alive: AtomicUsize,
    load_retries: usize,
}

struct InnerWorker<C: CandidateCompiler, R: KernelRuntime> {
    id: usize,
    shared: Arc<Shared<C, R>>,
    retired: Arc<AtomicBool>,
    sender: mpsc::Sender<Message<C::Artifact, R::Kernel>>,
}

struct AliveGuard<'a>(&'a AtomicUsize);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<C, R> InnerWorker<C, R>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
{
    fn work(self) {
        let _alive = AliveGuard(&self.shared.alive);
        log::trace!("Build worker {} started", self.id);

        while !self.retired.load(Ordering::SeqCst) {
            let slot = self.shared.next.fetch_add(1, Ordering::SeqCst);
            let Some(job) = self.shared.jobs.get(slot) else {
                break;
            };

            if self
                .sender
                .send(Message::Started {
                    slot,
                    worker: self.id,
                })
                .is_err()
            {
                break;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| self.build(job)))
                .unwrap_or_else(|payload| Err(CandidateError::Panicked(panic_message(&*payload))));

            if self.sender.send(Message::Finished { slot, outcome }).is_err() {
                break;
            }
        }

        log::trace!("Build worker {} stopped", self.id);
    }

    fn build(&self, job: &Job) -> Result<Built<C::Artifact, R::Kernel>, CandidateError> {
        let shared = &self.shared;
        let compiled =
            shared
                .compiler
                .compile(&shared.graph, &job.config, &shared.hardware, &job.name)?;

        let mut attempt = 0;
        let kernel = loop {
            match shared.runtime.load(&compiled.artifact) {
                Ok(kernel) => break kernel,
                Err(err) if attempt < shared.load_retries => {
                    attempt += 1;
                    log::debug!("Retrying load of {} ({attempt}): {err}", job.name);
                }
                Err(err) => return Err(CandidateError::Load(err)),
            }
        };

        Ok(Built {
            artifact: compiled.artifact,
            kernel,
            source: compiled.source,
        })
    }
}

/// Bounded pool compiling and loading candidates in parallel.
///
/// Every slot is written exactly once by the control thread, from the messages of the workers.
/// A build running past its timeout is abandoned: its worker is retired and a replacement takes
/// over the remaining slots.
struct BuildPool<C: CandidateCompiler, R: KernelRuntime> {
    shared: Arc<Shared<C, R>>,
    sender: mpsc::Sender<Message<C::Artifact, R::Kernel>>,
    receiver: mpsc::Receiver<Message<C::Artifact, R::Kernel>>,
    retired: HashMap<usize, Arc<AtomicBool>>,
    next_worker: usize,
}

impl<C, R> BuildPool<C, R>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
{
    fn spawn(&mut self) -> Result<(), std::io::Error> {
        let id = self.next_worker;
        let retired = Arc::new(AtomicBool::new(false));
        let worker = InnerWorker {
            id,
            shared: self.shared.clone(),
            retired: retired.clone(),
            sender: self.sender.clone(),
        };

        self.shared.alive.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("tilecraft-build-{id}"))
            .spawn(move || worker.work());

        match spawned {
            Ok(_) => {
                self.retired.insert(id, retired);
                self.next_worker += 1;
                Ok(())
            }
            Err(err) => {
                self.shared.alive.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn retire(&mut self, worker: usize) {
        if let Some(flag) = self.retired.remove(&worker) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn has_pending_jobs(&self) -> bool {
        self.shared.next.load(Ordering::SeqCst) < self.shared.jobs.len()
    }
}

/// Compile and load every candidate on a bounded worker pool.
///
/// The outcome of each candidate lands in its own slot, whatever order the builds finish in. A
/// failed, panicking or timed-out build only discards its own candidate.
#[allow(clippy::too_many_arguments)]
pub fn build_all<C, R>(
    compiler: &Arc<C>,
    runtime: &Arc<R>,
    graph: &Arc<OperatorGraph>,
    hardware: &Arc<HardwareProfile>,
    mut candidates: Vec<CandidateResult<C::Artifact, R::Kernel>>,
    options: &BuildOptions,
    logger: &mut Logger,
) -> Vec<CandidateResult<C::Artifact, R::Kernel>>
where
    C: CandidateCompiler,
    R: KernelRuntime<Artifact = C::Artifact>,
{
    let num_candidates = candidates.len();
    if num_candidates == 0 {
        return candidates;
    }

    let jobs = candidates
        .iter()
        .map(|candidate| Job {
            config: candidate.config,
            name: candidate.name.clone(),
        })
        .collect();
    let (sender, receiver) = mpsc::channel();
    let mut pool = BuildPool {
        shared: Arc::new(Shared {
            compiler: compiler.clone(),
            runtime: runtime.clone(),
            graph: graph.clone(),
            hardware: hardware.clone(),
            jobs,
            next: AtomicUsize::new(0),
            alive: AtomicUsize::new(0),
            load_retries: options.load_retries,
        }),
        sender,
        receiver,
        retired: HashMap::new(),
        next_worker: 0,
    };

    let num_workers = options.num_workers(num_candidates);
    for _ in 0..num_workers {
        if let Err(err) = pool.spawn() {
            log::warn!("Unable to spawn a build worker: {err}");
        }
    }
    log::debug!("Building {num_candidates} candidates on {num_workers} workers");

    let mut done = vec![false; num_candidates];
    let mut remaining = num_candidates;
    let mut running: HashMap<usize, (usize, Instant)> = HashMap::new();

    while remaining > 0 {
        let idle = pool.shared.alive.load(Ordering::SeqCst) == 0;

        match pool.receiver.recv_timeout(POLL_INTERVAL) {
            Ok(Message::Started { slot, worker }) => {
                running.insert(slot, (worker, Instant::now()));
            }
            Ok(Message::Finished { slot, outcome }) => {
                running.remove(&slot);
                if done[slot] {
                    log::debug!("Dropping late build of {}", candidates[slot].name);
                    continue;
                }
                done[slot] = true;
                remaining -= 1;

                let candidate = &mut candidates[slot];
                match outcome {
                    Ok(built) => {
                        candidate.artifact = Some(Arc::new(built.artifact));
                        candidate.kernel = Some(Arc::new(built.kernel));
                        candidate.source = built.source;
                        if logger.log_level_build() == BuildLogLevel::Full {
                            logger.log_build(&format!("Built {}", candidate.name));
                        }
                    }
                    Err(err) => {
                        logger.log_build(&format!("Failed to build {}: {err}", candidate.name));
                        candidate.fail(err);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) if idle => {
                // No worker left and nothing queued.
                let respawned = match pool.has_pending_jobs() {
                    true => pool.spawn(),
                    false => Ok(()),
                };
                if let Err(err) = &respawned {
                    log::warn!("Unable to spawn a build worker: {err}");
                }
                if respawned.is_err() || !pool.has_pending_jobs() {
                    for slot in (0..num_candidates).filter(|slot| !done[*slot]) {
                        candidates[slot].fail(CandidateError::Panicked(
                            "the build pool has no worker left".to_string(),
                        ));
                    }
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let expired: Vec<(usize, usize)> = running
            .iter()
            .filter(|(_, (_, started))| started.elapsed() >= options.compile_timeout)
            .map(|(slot, (worker, _))| (*slot, *worker))
            .collect();

        for (slot, worker) in expired {
            running.remove(&slot);
            done[slot] = true;
            remaining -= 1;
            pool.retire(worker);

            let candidate = &mut candidates[slot];
            logger.log_build(&format!(
                "Build of {} timed out after {:?}",
                candidate.name, options.compile_timeout
            ));
            candidate.fail(CandidateError::Timeout {
                phase: TimeoutPhase::Build,
                after: options.compile_timeout,
            });

            if pool.has_pending_jobs() {
                if let Err(err) = pool.spawn() {
                    log::warn!("Unable to spawn a replacement build worker: {err}");
                }
            }
        }
    }

    for (_, flag) in pool.retired.drain() {
        flag.store(true, Ordering::SeqCst);
    }

    candidates
}

