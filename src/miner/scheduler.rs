// src/miner/scheduler.rs
//! Job dispatch across backends
//!
//! The [`Scheduler`] is the single entry point of the outer surface (pool
//! client, job feed, benchmark). It validates incoming jobs, fans them out to
//! every enabled backend, drives the pause flag and aggregates hashrate.
//! A failing backend never stops the others.

use crate::backend::cpu::CpuBackend;
use crate::backend::{Backend, cuda, opencl};
use crate::config::Config;
use crate::miner::algorithm::AlgorithmRegistry;
use crate::miner::job::{Job, JobResult};
use crate::miner::nonce::NonceCoordinator;
use crate::stats::hashrate;
use crate::topology::provider;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinates jobs across every backend
pub struct Scheduler {
    /// Generation counters and pause flag shared with every lane
    coordinator: Arc<NonceCoordinator>,
    /// Backends in dispatch order
    backends: Vec<Box<dyn Backend>>,
    /// Last job dispatched (the pause job before the first one)
    current: ArcSwap<Job>,
    /// Seconds ticked
    ticks: AtomicU64,
    /// Highest short-window rate of the sum across backends, as `f64` bits
    ///
    /// Each backend keeps its own peak in its [`Hashrate`](crate::stats::Hashrate);
    /// those peaks need not coincide, so their sum is not this value.
    highest: AtomicU64,
}

impl Scheduler {
    /// Creates a scheduler over `backends`
    ///
    /// # Arguments
    /// * `coordinator` - Generation counters the backends were built with
    /// * `backends` - Backends to dispatch to
    pub fn new(coordinator: Arc<NonceCoordinator>, backends: Vec<Box<dyn Backend>>) -> Self {
        Scheduler {
            coordinator,
            backends,
            current: ArcSwap::from_pointee(Job::paused()),
            ticks: AtomicU64::new(0),
            highest: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Builds the CPU, CUDA and OpenCL backends described by `config`
    ///
    /// # Arguments
    /// * `config` - Validated configuration
    /// * `registry` - CPU hash implementations
    /// * `results` - Channel receiving every result of every lane
    ///
    /// # Returns
    /// - `Ok(Scheduler)` with idle backends; lanes start with the first job
    /// - `Err(MinerError)` if the CPU topology cannot be read
    pub fn from_config(
        config: &Config,
        registry: AlgorithmRegistry,
        results: Sender<JobResult>,
    ) -> Result<Self, MinerError> {
        let coordinator = Arc::new(NonceCoordinator::new());
        let topology = provider::detect(config.cpu.topology.as_deref())?;
        log::info!(
            "CPU {} threads {} cores {} L2 {} KB L3 {} KB",
            if topology.brand.is_empty() { "unknown" } else { &topology.brand },
            topology.threads,
            topology.cores,
            topology.l2() / 1024,
            topology.l3() / 1024
        );

        let backends: Vec<Box<dyn Backend>> = vec![
            Box::new(CpuBackend::new(
                config.cpu.clone(),
                topology,
                registry,
                coordinator.clone(),
                results.clone(),
            )),
            Box::new(cuda::backend(config.cuda.clone(), None, coordinator.clone(), results.clone())),
            Box::new(opencl::backend(config.opencl.clone(), None, coordinator.clone(), results)),
        ];

        Ok(Scheduler::new(coordinator, backends))
    }

    /// Dispatches `job` to every enabled backend
    ///
    /// # Returns
    /// - `Ok(true)` if the job was dispatched
    /// - `Ok(false)` if it equals the running job (nothing is touched)
    /// - `Err(MinerError::InvalidJob)` for an active job without blob or
    ///   target; the previous job keeps running
    pub fn set_job(&self, job: Job) -> Result<bool, MinerError> {
        if job.is_active() && !job.is_valid() {
            return Err(MinerError::InvalidJob(format!("job '{}' has no blob or target", job.id())));
        }

        let current = self.current.load_full();
        if *current == job && current.pool_id() == job.pool_id() {
            log::debug!("job '{}' redelivered, ignoring", job.id());
            return Ok(false);
        }

        if job.is_active() {
            log::info!(
                "new job from pool #{} diff {} algo {} id {}",
                job.pool_id(),
                job.difficulty(),
                job.algorithm(),
                job.id()
            );
        } else {
            log::warn!("no active pool, lanes pause");
        }

        self.current.store(Arc::new(job.clone()));
        for backend in self.backends.iter().filter(|b| b.is_enabled()) {
            if let Err(e) = backend.set_job(&job) {
                log::error!("{} backend rejected job '{}': {}", backend.kind(), job.id(), e);
            }
        }
        Ok(true)
    }

    /// Pool-level pause: every lane snapshots its cursors and waits
    ///
    /// Delivering the same job again afterwards resumes exactly where each
    /// lane stopped.
    pub fn pause(&self) {
        // the pause job is always valid
        let _ = self.set_job(Job::paused());
    }

    /// Flips the global pause flag
    ///
    /// Either edge bumps every generation: hashing lanes drop out of their
    /// round loop on pause and pick their job up again on resume.
    pub fn set_enabled(&self, enabled: bool) {
        let was_paused = self.coordinator.set_paused(!enabled);
        if was_paused == enabled {
            self.coordinator.touch_all();
            log::info!("{}", if enabled { "resumed" } else { "paused" });
        }
    }

    /// Whether lanes are allowed to hash
    pub fn is_enabled(&self) -> bool {
        !self.coordinator.is_paused()
    }

    /// Once-per-second housekeeping
    pub fn tick(&self) {
        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        for backend in &self.backends {
            backend.tick(ticks);
        }

        let [short, _, _] = self.hashrate();
        let _ = self.highest.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            (short > f64::from_bits(bits)).then(|| short.to_bits())
        });
    }

    /// Total 10s/60s/15m rates across backends
    pub fn hashrate(&self) -> [f64; 3] {
        let mut total = [0.0; 3];
        for rate in self.backends.iter().filter_map(|b| b.hashrate()) {
            for (sum, value) in total.iter_mut().zip(rate.totals()) {
                *sum += value;
            }
        }
        total.map(hashrate::normalize)
    }

    /// Highest total short-window rate seen by [`tick`](Self::tick), never decreasing
    pub fn highest(&self) -> f64 {
        f64::from_bits(self.highest.load(Ordering::Relaxed))
    }

    /// Hashes computed by every running lane
    pub fn total_hashes(&self) -> u64 {
        self.backends
            .iter()
            .filter_map(|b| b.hashrate())
            .map(|rate| rate.total_hashes())
            .sum()
    }

    /// Last dispatched job
    pub fn job(&self) -> Arc<Job> {
        self.current.load_full()
    }

    /// Backends in dispatch order
    pub fn backends(&self) -> &[Box<dyn Backend>] {
        &self.backends
    }

    /// Shared generation counters
    pub fn coordinator(&self) -> &Arc<NonceCoordinator> {
        &self.coordinator
    }

    /// Logs every enabled backend's speed and the total
    pub fn print_hashrate(&self, details: bool) {
        for backend in self.backends.iter().filter(|b| b.is_enabled()) {
            backend.print_hashrate(details);
        }
        let [short, medium, large] = self.hashrate();
        log::info!(
            "speed 10s/60s/15m {} {} {} H/s max {} H/s",
            hashrate::format(short),
            hashrate::format(medium),
            hashrate::format(large),
            hashrate::format(self.highest())
        );
    }

    /// Machine-readable status
    pub fn to_json(&self) -> Value {
        let job = self.job();
        json!({
            "algo": job.algorithm().to_string(),
            "job": {
                "id": job.id(),
                "pool_id": job.pool_id(),
                "diff": job.difficulty(),
                "active": job.is_active(),
            },
            "paused": !self.is_enabled(),
            "hashrate": {
                "total": self.hashrate(),
                "highest": self.highest(),
            },
            "backends": self.backends.iter().map(|b| b.to_json()).collect::<Vec<_>>(),
        })
    }

    /// Stops every backend for good
    ///
    /// Returns once every lane thread has exited.
    pub fn stop(&self) {
        self.coordinator.shutdown();
        for backend in &self.backends {
            backend.stop();
        }
        log::info!("all backends stopped");
    }
}
