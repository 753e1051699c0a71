// src/backend/cpu/mod.rs
//! CPU backend
//!
//! Plans lanes from the CPU topology, runs one [`worker::CpuWorker`] thread
//! per planned worker and restarts them when the algorithm family changes.

/// Scratchpad memory with huge page support
pub mod mem;
/// Multi-lane CPU worker
pub mod worker;

use crate::backend::{Backend, BackendShared, LaunchData, LaunchStatus, Workers};
use crate::config::CpuConfig;
use crate::miner::algorithm::AlgorithmRegistry;
use crate::miner::job::{Job, JobResult};
use crate::miner::nonce::NonceCoordinator;
use crate::miner::worker::{ResultSink, Worker};
use crate::stats::hashrate::{self, Hashrate};
use crate::topology::{self, CpuTopology};
use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use crossbeam_channel::Sender;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Launch parameters of one CPU thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLaunchData {
    /// Algorithm the lanes were planned for
    pub algorithm: AlgorithmType,
    /// Lanes on this thread
    pub intensity: usize,
    /// PU to pin to
    pub affinity: Option<usize>,
    /// Try huge pages for the scratchpad
    pub huge_pages: bool,
    /// Lanes across the whole backend
    pub total_ways: u32,
    /// Index of this thread's first lane
    pub offset: u32,
}

impl LaunchData for CpuLaunchData {
    fn affinity(&self) -> Option<usize> {
        self.affinity
    }

    fn ways(&self) -> usize {
        self.intensity
    }
}

struct CpuState {
    workers: Workers<CpuLaunchData>,
    algorithm: Option<AlgorithmType>,
}

/// CPU compute backend
pub struct CpuBackend {
    config: CpuConfig,
    topology: CpuTopology,
    registry: AlgorithmRegistry,
    shared: Arc<BackendShared>,
    sink: ResultSink,
    state: Mutex<CpuState>,
}

impl CpuBackend {
    /// Creates an idle CPU backend; threads start with the first job
    pub fn new(
        config: CpuConfig,
        topology: CpuTopology,
        registry: AlgorithmRegistry,
        coordinator: Arc<NonceCoordinator>,
        results: Sender<JobResult>,
    ) -> Self {
        CpuBackend {
            config,
            topology,
            registry,
            shared: Arc::new(BackendShared::new(BackendKind::Cpu, coordinator)),
            sink: ResultSink::new(results),
            state: Mutex::new(CpuState {
                workers: Workers::new(Arc::new(LaunchStatus::new(BackendKind::Cpu))),
                algorithm: None,
            }),
        }
    }

    /// Threads that would be started for `algorithm`
    pub fn launches(&self, algorithm: AlgorithmType) -> Vec<CpuLaunchData> {
        let mut plan = topology::plan(algorithm, &self.topology, self.config.fill);
        if self.config.max_threads > 0 {
            plan.truncate(self.config.max_threads);
        }

        let intensity_of = |planned: usize| self.config.intensity.unwrap_or(planned).clamp(1, 5);
        let total_ways: usize = plan.iter().map(|lane| intensity_of(lane.intensity)).sum();

        let mut offset = 0;
        plan.iter()
            .map(|lane| {
                let intensity = intensity_of(lane.intensity);
                let launch = CpuLaunchData {
                    algorithm,
                    intensity,
                    affinity: if self.config.affinity { lane.affinity } else { None },
                    huge_pages: self.config.huge_pages,
                    total_ways: total_ways as u32,
                    offset: offset as u32,
                };
                offset += intensity;
                launch
            })
            .collect()
    }

    /// Shared state handed to the lanes
    pub fn shared(&self) -> &Arc<BackendShared> {
        &self.shared
    }

    fn state(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restart(&self, state: &mut CpuState, algorithm: AlgorithmType) -> Result<(), MinerError> {
        // an unplannable family leaves the running lanes alone
        let launches = self.launches(algorithm);
        if launches.is_empty() {
            return Err(MinerError::TopologyError(format!(
                "no CPU threads fit the {} scratchpad",
                algorithm.family()
            )));
        }

        let coordinator = self.shared.coordinator();
        if state.workers.is_running() {
            log::info!("CPU algorithm family changed to {}, restarting threads", algorithm.family());
            coordinator.stop(BackendKind::Cpu);
            state.workers.stop();
            if !coordinator.rearm(BackendKind::Cpu) {
                return Ok(());
            }
        }

        self.shared.set_ready(false);
        state.algorithm = Some(algorithm);
        log::info!(
            "CPU use profile {} threads {} lanes for {}",
            launches.len(),
            launches.iter().map(|l| l.intensity).sum::<usize>(),
            algorithm
        );

        let registry = self.registry.clone();
        state
            .workers
            .start(launches, self.shared.clone(), self.sink.clone(), move |index, launch| {
                Ok(Box::new(worker::CpuWorker::new(index, launch, &registry)?) as Box<dyn Worker>)
            });
        Ok(())
    }
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn set_job(&self, job: &Job) -> Result<(), MinerError> {
        if !self.is_enabled() || self.shared.coordinator().is_shutdown() {
            return Ok(());
        }

        let mut state = self.state();
        self.shared.set_job(job.clone());

        let family_changed = state.algorithm.map(|a| a.family()) != Some(job.algorithm().family());
        if job.is_active() && family_changed {
            self.restart(&mut state, job.algorithm())?;
        }
        Ok(())
    }

    fn hashrate(&self) -> Option<Arc<Hashrate>> {
        self.state().workers.hashrate()
    }

    fn profile(&self) -> String {
        let state = self.state();
        let summary = state.workers.summary();
        match state.algorithm {
            Some(algorithm) => format!(
                "{} threads {}/{} lanes {} memory {} KB",
                algorithm,
                summary.started,
                summary.threads,
                summary.ways,
                summary.memory.size / 1024
            ),
            None => "idle".to_string(),
        }
    }

    fn stop(&self) {
        let mut state = self.state();
        self.shared.coordinator().stop(BackendKind::Cpu);
        state.workers.stop();
    }

    fn to_json(&self) -> Value {
        let state = self.state();
        let summary = state.workers.summary();
        let rate = state.workers.hashrate();
        let threads: Vec<Value> = state
            .workers
            .launches()
            .iter()
            .enumerate()
            .map(|(index, launch)| {
                let speed = rate.as_ref().map(|r| {
                    hashrate::INTERVALS.map(|interval| r.calc(index, interval))
                });
                json!({
                    "intensity": launch.intensity,
                    "affinity": launch.affinity,
                    "offset": launch.offset,
                    "total_ways": launch.total_ways,
                    "hashrate": speed,
                })
            })
            .collect();

        json!({
            "type": BackendKind::Cpu.to_string(),
            "enabled": self.config.enabled,
            "algo": state.algorithm.map(|a| a.to_string()),
            "brand": self.topology.brand,
            "l2": self.topology.l2(),
            "l3": self.topology.l3(),
            "hugepages": [summary.memory.huge_pages, summary.memory.pages],
            "memory": summary.memory.size,
            "ready": self.shared.is_ready(),
            "threads": threads,
            "hashrate": rate.map(|r| r.totals()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::algorithm::testing;
    use crate::topology::{CacheDomain, Core, CoreFill};

    fn backend(config: CpuConfig) -> CpuBackend {
        let topology = CpuTopology {
            brand: "test".into(),
            threads: 4,
            cores: 4,
            nodes: 1,
            caches: vec![CacheDomain {
                level: 3,
                size: 8 << 20,
                exclusive: false,
                l2: Vec::new(),
                cores: (0..4).map(|i| Core { pus: vec![i] }).collect(),
            }],
        };
        let (tx, _rx) = crossbeam_channel::unbounded();
        CpuBackend::new(
            config,
            topology,
            AlgorithmRegistry::new(),
            Arc::new(NonceCoordinator::new()),
            tx,
        )
    }

    #[test]
    fn launches_share_one_partition() {
        let cpu = backend(CpuConfig {
            intensity: Some(2),
            fill: CoreFill::Pack,
            ..CpuConfig::default()
        });
        let launches = cpu.launches(AlgorithmType::CnV0);
        assert_eq!(launches.len(), 4);
        assert!(launches.iter().all(|l| l.total_ways == 8));
        assert_eq!(launches.iter().map(|l| l.offset).collect::<Vec<_>>(), vec![0, 2, 4, 6]);
        assert_eq!(launches[3].affinity, Some(3));
    }

    #[test]
    fn max_threads_and_affinity_switch() {
        let cpu = backend(CpuConfig {
            max_threads: 2,
            affinity: false,
            ..CpuConfig::default()
        });
        let launches = cpu.launches(AlgorithmType::CnV0);
        assert_eq!(launches.len(), 2);
        assert!(launches.iter().all(|l| l.affinity.is_none() && l.total_ways == 2));
    }

    #[test]
    fn disabled_backend_ignores_jobs() {
        let cpu = backend(CpuConfig {
            enabled: false,
            ..CpuConfig::default()
        });
        let job = Job::from_hex(0, "a", AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap();
        cpu.set_job(&job).unwrap();
        assert!(cpu.hashrate().is_none());
        assert_eq!(cpu.profile(), "idle");
    }

    #[test]
    fn unplannable_family_keeps_running_lanes() {
        let topology = CpuTopology {
            brand: "test".into(),
            threads: 2,
            cores: 2,
            nodes: 1,
            caches: vec![CacheDomain {
                level: 3,
                size: 3 << 20,
                exclusive: false,
                l2: Vec::new(),
                cores: (0..2).map(|i| Core { pus: vec![i] }).collect(),
            }],
        };
        let (tx, _rx) = crossbeam_channel::unbounded();
        let cpu = CpuBackend::new(
            CpuConfig {
                huge_pages: false,
                affinity: false,
                ..CpuConfig::default()
            },
            topology,
            testing::registry(),
            Arc::new(NonceCoordinator::new()),
            tx,
        );

        let cn = Job::from_hex(0, "cn", AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap();
        cpu.set_job(&cn).unwrap();
        assert_eq!(cpu.state().workers.launches().len(), 1);

        // a 4 MiB scratchpad does not fit the 3 MiB cache
        let heavy = Job::from_hex(0, "heavy", AlgorithmType::CnHeavyV0, &"00".repeat(76), "0100", false).unwrap();
        assert!(matches!(cpu.set_job(&heavy), Err(MinerError::TopologyError(_))));
        {
            let state = cpu.state();
            assert!(state.workers.is_running());
            assert_eq!(state.algorithm, Some(AlgorithmType::CnV0));
        }

        // the heavy family is planned again on its next job
        let heavy2 = Job::from_hex(0, "heavy2", AlgorithmType::CnHeavyV0, &"00".repeat(76), "0100", false).unwrap();
        assert!(cpu.set_job(&heavy2).is_err());
        cpu.stop();
    }
}
