// src/backend/mod.rs
//! Compute backends
//!
//! A backend owns the lanes of one [`BackendKind`]: it plans them, spawns a
//! thread per worker, publishes the current job to them and exposes their
//! hashrate. The scheduler only ever talks to the [`Backend`] trait.

/// CPU backend with per-lane scratchpads
pub mod cpu;
/// NVIDIA constructor on top of the generic GPU backend
pub mod cuda;
/// Vendor device library capability
pub mod device;
/// Generic accelerator backend
pub mod gpu;
/// OpenCL constructor on top of the generic GPU backend
pub mod opencl;
/// Thread pool shared by every backend
pub mod workers;

pub use workers::{LaunchData, Workers};

use crate::backend::cpu::mem::MemInfo;
use crate::miner::job::Job;
use crate::miner::nonce::NonceCoordinator;
use crate::stats::hashrate::{self, Hashrate};
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Interface the scheduler drives every backend through
pub trait Backend: Send + Sync {
    /// Kind of lanes this backend runs
    fn kind(&self) -> BackendKind;

    /// Configured on and able to run
    fn is_enabled(&self) -> bool;

    /// Publishes `job` to every lane
    ///
    /// An algorithm family change re-plans and restarts the lanes. Errors
    /// stay local to this backend.
    fn set_job(&self, job: &Job) -> Result<(), MinerError>;

    /// Hashrate of the running lanes, `None` before the first start
    fn hashrate(&self) -> Option<Arc<Hashrate>>;

    /// One-line description of the running configuration
    fn profile(&self) -> String;

    /// Periodic housekeeping, called once per second
    fn tick(&self, _ticks: u64) {
        if let Some(hashrate) = self.hashrate() {
            hashrate.update_highest();
        }
    }

    /// Stops every lane of this backend and waits for them
    fn stop(&self);

    /// Machine-readable status
    fn to_json(&self) -> Value;

    /// Logs the backend's speed, per thread when `details` is set
    fn print_hashrate(&self, details: bool) {
        let Some(rate) = self.hashrate() else {
            return;
        };
        if details {
            for index in 0..rate.threads() {
                log::info!(
                    "{} #{:<3} {:>8} {:>8} {:>8} H/s",
                    self.kind(),
                    index,
                    hashrate::format(rate.calc(index, hashrate::SHORT_INTERVAL)),
                    hashrate::format(rate.calc(index, hashrate::MEDIUM_INTERVAL)),
                    hashrate::format(rate.calc(index, hashrate::LARGE_INTERVAL)),
                );
            }
        }
        let [short, medium, large] = rate.totals();
        log::info!(
            "{} speed 10s/60s/15m {} {} {} H/s max {} H/s",
            self.kind(),
            hashrate::format(short),
            hashrate::format(medium),
            hashrate::format(large),
            hashrate::format(rate.highest()),
        );
    }
}

/// State a backend shares with its lanes
pub struct BackendShared {
    kind: BackendKind,
    coordinator: Arc<NonceCoordinator>,
    job: ArcSwap<Job>,
    ready: AtomicBool,
}

impl BackendShared {
    /// Creates shared state holding the pause job, not ready
    pub fn new(kind: BackendKind, coordinator: Arc<NonceCoordinator>) -> Self {
        BackendShared {
            kind,
            coordinator,
            job: ArcSwap::from_pointee(Job::paused()),
            ready: AtomicBool::new(false),
        }
    }

    /// Backend kind
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Process-wide generation counters
    pub fn coordinator(&self) -> &Arc<NonceCoordinator> {
        &self.coordinator
    }

    /// Current generation of this kind
    pub fn sequence(&self) -> u64 {
        self.coordinator.sequence(self.kind)
    }

    /// Job lanes should work on
    pub fn job(&self) -> Arc<Job> {
        self.job.load_full()
    }

    /// Stores `job` and bumps the generation
    ///
    /// # Returns
    /// `false` if an equal job was already published; nothing changes then
    pub fn set_job(&self, job: Job) -> bool {
        if *self.job.load_full() == job && self.job.load().pool_id() == job.pool_id() {
            return false;
        }
        self.job.store(Arc::new(job));
        self.coordinator.touch(self.kind);
        true
    }

    /// Backend finished bringing its lanes up
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Marks the backend (not) ready
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// Snapshot of a backend start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchSummary {
    /// Threads requested
    pub threads: usize,
    /// Lanes across every thread
    pub ways: usize,
    /// Threads that passed construction and self-test
    pub started: usize,
    /// Threads that did not
    pub failed: usize,
    /// Scratchpad totals of started threads
    pub memory: MemInfo,
}

#[derive(Default)]
struct LaunchProgress {
    summary: LaunchSummary,
    since: Option<Instant>,
}

/// Tracks lanes coming up and flips readiness once all have reported
pub struct LaunchStatus {
    kind: BackendKind,
    progress: Mutex<LaunchProgress>,
}

impl LaunchStatus {
    /// Creates an idle status for `kind`
    pub fn new(kind: BackendKind) -> Self {
        LaunchStatus {
            kind,
            progress: Mutex::new(LaunchProgress::default()),
        }
    }

    /// Begins tracking a start of `threads` threads running `ways` lanes
    pub fn start(&self, threads: usize, ways: usize) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.summary = LaunchSummary {
            threads,
            ways,
            ..LaunchSummary::default()
        };
        progress.since = Some(Instant::now());
    }

    /// A thread passed its self-test
    pub fn started(&self, memory: Option<MemInfo>, shared: &BackendShared) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.summary.started += 1;
        if let Some(memory) = memory {
            progress.summary.memory.size += memory.size;
            progress.summary.memory.pages += memory.pages;
            progress.summary.memory.huge_pages += memory.huge_pages;
        }
        self.finish_if_done(&progress, shared);
    }

    /// A thread could not be constructed or failed its self-test
    pub fn failed(&self, shared: &BackendShared) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.summary.failed += 1;
        self.finish_if_done(&progress, shared);
    }

    /// Current counters
    pub fn summary(&self) -> LaunchSummary {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).summary
    }

    fn finish_if_done(&self, progress: &LaunchProgress, shared: &BackendShared) {
        let summary = &progress.summary;
        if summary.started + summary.failed < summary.threads {
            return;
        }

        if summary.started == 0 {
            log::error!("{} disabled: none of {} threads started", self.kind, summary.threads);
            return;
        }

        let elapsed = progress.since.map(|t| t.elapsed().as_millis()).unwrap_or_default();
        let huge_percent = if summary.memory.pages > 0 {
            summary.memory.huge_pages * 100 / summary.memory.pages
        } else {
            0
        };
        log::info!(
            "{} READY threads {}/{} ({}) huge pages {}% {}/{} memory {} KB ({} ms)",
            self.kind,
            summary.started,
            summary.threads,
            summary.ways,
            huge_percent,
            summary.memory.huge_pages,
            summary.memory.pages,
            summary.memory.size / 1024,
            elapsed
        );
        shared.set_ready(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlgorithmType;

    fn job(id: &str) -> Job {
        Job::from_hex(0, id, AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap()
    }

    #[test]
    fn equal_job_does_not_bump_generation() {
        let coordinator = Arc::new(NonceCoordinator::new());
        let shared = BackendShared::new(BackendKind::Cpu, coordinator.clone());

        assert!(shared.set_job(job("a")));
        let seq = shared.sequence();
        assert!(!shared.set_job(job("a")));
        assert_eq!(shared.sequence(), seq);

        assert!(shared.set_job(job("b")));
        assert_eq!(shared.sequence(), seq + 1);
        assert_eq!(coordinator.sequence(BackendKind::Cuda), 1);
    }

    #[test]
    fn ready_only_after_every_thread_reported() {
        let shared = BackendShared::new(BackendKind::Cpu, Arc::new(NonceCoordinator::new()));
        let status = LaunchStatus::new(BackendKind::Cpu);
        status.start(3, 3);

        status.started(Some(MemInfo { size: 2048, pages: 1, huge_pages: 1 }), &shared);
        status.failed(&shared);
        assert!(!shared.is_ready());

        status.started(None, &shared);
        assert!(shared.is_ready());
        let summary = status.summary();
        assert_eq!((summary.started, summary.failed), (2, 1));
        assert_eq!(summary.memory.size, 2048);
    }

    #[test]
    fn never_ready_when_every_thread_failed() {
        let shared = BackendShared::new(BackendKind::OpenCl, Arc::new(NonceCoordinator::new()));
        let status = LaunchStatus::new(BackendKind::OpenCl);
        status.start(2, 2);
        status.failed(&shared);
        status.failed(&shared);
        assert!(!shared.is_ready());
    }
}
