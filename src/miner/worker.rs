// src/miner/worker.rs
//! Worker thread implementation
//!
//! Every backend lane, CPU or GPU, runs the same state machine in [`run`]:
//!
//! ```text
//! WaitingForReady -> Hashing <-> Outdated -> Terminated
//!                       |            ^
//!                       v            |
//!                     Paused --------+
//! ```
//!
//! Device specifics live behind the [`Worker`] trait; the loop here only
//! deals with generations, readiness and the pause flag.

use crate::backend::BackendShared;
use crate::miner::job::{Job, JobResult, top64};
use crate::miner::worker_job::{Transition, WorkerJob};
use crate::stats::hashrate::Hashrate;
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;

/// Sleep between polls while waiting for readiness or a new job
pub const WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Lifecycle state of a worker lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Backend not ready or globally paused
    WaitingForReady,
    /// Running hash rounds on the current job
    Hashing,
    /// Generation moved on; the job must be consumed again
    Outdated,
    /// Holding a paused job until the generation moves
    Paused,
    /// Generation 0 observed; resources released
    Terminated,
}

/// Outcome of one hash round
#[derive(Debug, Clone, Copy, Default)]
pub struct Round {
    /// Hashes computed
    pub hashes: u64,
    /// A lane ran past the end of its nonce range
    pub wrapped: bool,
}

/// Checks a digest against a job target
///
/// The top 64 bits of the digest (bytes 24..32, little-endian) must be
/// strictly below the target.
#[inline]
pub fn is_valid_share(digest: &[u8; 32], target: u64) -> bool {
    top64(digest) < target
}

/// Sends found results to the collector
#[derive(Clone)]
pub struct ResultSink {
    sender: Sender<JobResult>,
}

impl ResultSink {
    /// Wraps the result channel
    pub fn new(sender: Sender<JobResult>) -> Self {
        ResultSink { sender }
    }

    /// Checks `digest` against `job`'s target and submits it when it qualifies
    ///
    /// # Returns
    /// `true` if a result was emitted
    pub fn check(&self, job: &Job, nonce: u32, digest: [u8; 32]) -> bool {
        if !is_valid_share(&digest, job.target()) {
            return false;
        }
        if let Err(e) = self.sender.send(JobResult::new(job, nonce, digest)) {
            log::warn!("Dropping result for job {}: {}", job.id(), MinerError::from(e));
        }
        true
    }
}

/// Device side of a worker lane
pub trait Worker: Send {
    /// Lane index within its backend
    fn id(&self) -> usize;

    /// Verifies the hash implementation before any hashing
    fn self_test(&mut self) -> Result<(), MinerError>;

    /// Nonce cursor of this lane
    fn cursor(&self) -> &WorkerJob;

    /// Mutable nonce cursor of this lane
    fn cursor_mut(&mut self) -> &mut WorkerJob;

    /// Whether this lane can compute `job`'s algorithm
    fn can_hash(&self, job: &Job) -> bool;

    /// Hook run after the cursor took a new or resumed job
    fn on_job(&mut self) -> Result<(), MinerError> {
        Ok(())
    }

    /// Computes one batch, reporting qualifying digests through `sink`
    fn hash_round(&mut self, sink: &ResultSink) -> Result<Round, MinerError>;

    /// Rounds between hashrate samples
    fn rounds_per_sample(&self) -> u64 {
        1
    }

    /// Scratchpad footprint, if the lane owns one
    fn memory(&self) -> Option<crate::backend::cpu::mem::MemInfo> {
        None
    }
}

/// Everything a lane thread needs besides its [`Worker`]
pub struct WorkerContext {
    /// Lane index, also the hashrate slot
    pub index: usize,
    /// Backend-wide job, readiness and generation access
    pub shared: Arc<BackendShared>,
    /// Result collector
    pub sink: ResultSink,
    /// Hashrate storage of the owning backend
    pub hashrate: Arc<Hashrate>,
}

impl WorkerContext {
    fn kind(&self) -> BackendKind {
        self.shared.kind()
    }

    fn is_ready(&self) -> bool {
        self.shared.is_ready() && !self.shared.coordinator().is_paused()
    }

    /// Sleeps until the backend is ready; `false` if stopped meanwhile
    fn wait_until_ready(&self) -> bool {
        loop {
            if self.shared.sequence() == 0 {
                return false;
            }
            if self.is_ready() {
                return true;
            }
            std::thread::sleep(WAIT_INTERVAL);
        }
    }

    /// Sleeps until the generation moves away from `local`
    fn wait_for_change(&self, local: u64) {
        while !self.shared.coordinator().is_outdated(self.kind(), local) {
            std::thread::sleep(WAIT_INTERVAL);
        }
    }
}

/// Drives `worker` until its backend kind is stopped
///
/// Returns once the lane reached [`WorkerState::Terminated`]; the caller
/// drops the worker afterwards, releasing its scratchpad or device context.
pub fn run(worker: &mut dyn Worker, ctx: &WorkerContext) {
    let mut state = WorkerState::WaitingForReady;
    let mut count: u64 = 0;
    let mut rounds: u64 = 0;
    let mut wrap_reported = false;

    loop {
        state = match state {
            WorkerState::WaitingForReady => {
                if ctx.wait_until_ready() {
                    consume(worker, ctx, &mut wrap_reported)
                } else {
                    WorkerState::Terminated
                }
            }

            WorkerState::Paused => {
                ctx.wait_for_change(worker.cursor().sequence());
                WorkerState::Outdated
            }

            WorkerState::Hashing => {
                let sequence = worker.cursor().sequence();
                let per_sample = worker.rounds_per_sample().max(1);
                let mut next = WorkerState::Outdated;

                while !ctx.shared.coordinator().is_outdated(ctx.kind(), sequence) {
                    match worker.hash_round(&ctx.sink) {
                        Ok(round) => {
                            count += round.hashes;
                            if round.wrapped && !wrap_reported {
                                wrap_reported = true;
                                log::warn!(
                                    "{} thread #{} exhausted its nonce range for job {}",
                                    ctx.kind(),
                                    worker.id(),
                                    worker.cursor().job().id()
                                );
                            }
                        }
                        Err(e) => {
                            log::error!("{} thread #{} failed: {}", ctx.kind(), worker.id(), e);
                            next = WorkerState::Terminated;
                            break;
                        }
                    }

                    rounds += 1;
                    if rounds % per_sample == 0 {
                        ctx.hashrate.add(ctx.index, count);
                    }
                    std::thread::yield_now();
                }
                next
            }

            WorkerState::Outdated => {
                if ctx.shared.sequence() == 0 {
                    WorkerState::Terminated
                } else if !ctx.is_ready() {
                    WorkerState::WaitingForReady
                } else {
                    consume(worker, ctx, &mut wrap_reported)
                }
            }

            WorkerState::Terminated => break,
        };
    }

    ctx.hashrate.add(ctx.index, count);
    log::debug!("{} thread #{} terminated", ctx.kind(), worker.id());
}

/// Loads the backend's current job into the worker's cursor
fn consume(worker: &mut dyn Worker, ctx: &WorkerContext, wrap_reported: &mut bool) -> WorkerState {
    let sequence = ctx.shared.sequence();
    if sequence == 0 {
        return WorkerState::Terminated;
    }
    let job = ctx.shared.job();

    match worker.cursor_mut().consume(&job, sequence) {
        Transition::Paused => return WorkerState::Paused,
        Transition::Replaced | Transition::Resumed => {
            *wrap_reported = false;
            if let Err(e) = worker.on_job() {
                log::error!("{} thread #{} cannot load job: {}", ctx.kind(), worker.id(), e);
                return WorkerState::Terminated;
            }
        }
        Transition::Unchanged => {}
    }

    let current = worker.cursor().job();
    if !current.is_active() || !current.is_valid() {
        return WorkerState::Paused;
    }
    if !worker.can_hash(current) {
        log::warn!(
            "{} thread #{} cannot hash {}, waiting for the next job",
            ctx.kind(),
            worker.id(),
            current.algorithm()
        );
        return WorkerState::Paused;
    }
    WorkerState::Hashing
}
