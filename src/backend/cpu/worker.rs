// src/backend/cpu/worker.rs
//! CPU worker
//!
//! Runs `intensity` lanes on one thread. Each lane hashes its own blob
//! replica into its own scratchpad slice; one round is one hash per lane.

use crate::backend::cpu::CpuLaunchData;
use crate::backend::cpu::mem::{MemInfo, Scratchpad};
use crate::miner::algorithm::{Algorithm, AlgorithmRegistry};
use crate::miner::job::Job;
use crate::miner::worker::{ResultSink, Round, Worker};
use crate::miner::worker_job::WorkerJob;
use crate::utils::error::MinerError;
use std::sync::Arc;

/// Rounds between hashrate samples
const ROUNDS_PER_SAMPLE: u64 = 8;

/// Multi-lane CPU worker
pub struct CpuWorker {
    id: usize,
    job: WorkerJob,
    scratchpad: Scratchpad,
    algorithms: Vec<Arc<dyn Algorithm>>,
    current: Option<Arc<dyn Algorithm>>,
}

impl CpuWorker {
    /// Builds a worker and reserves its scratchpads
    ///
    /// # Arguments
    /// * `id` - Thread index within the backend
    /// * `launch` - Planned lanes, affinity and nonce partition
    /// * `registry` - Source of the hash implementations
    ///
    /// # Returns
    /// - `Ok(CpuWorker)` ready for its self-test
    /// - `Err(MinerError)` if the family has no implementation or memory
    ///   cannot be reserved
    pub fn new(id: usize, launch: &CpuLaunchData, registry: &AlgorithmRegistry) -> Result<Self, MinerError> {
        let algorithms = registry.family(launch.algorithm);
        if algorithms.is_empty() {
            return Err(MinerError::AlgorithmError(format!(
                "no CPU implementation for the {} family",
                launch.algorithm
            )));
        }

        let scratchpad = Scratchpad::allocate(launch.algorithm.memory(), launch.intensity, launch.huge_pages)?;

        Ok(CpuWorker {
            id,
            job: WorkerJob::new(launch.intensity, launch.total_ways, launch.offset),
            scratchpad,
            algorithms,
            current: None,
        })
    }
}

impl Worker for CpuWorker {
    fn id(&self) -> usize {
        self.id
    }

    /// Every family variant must reproduce its reference digest in every lane
    fn self_test(&mut self) -> Result<(), MinerError> {
        for algorithm in &self.algorithms {
            for lane in 0..self.scratchpad.lanes() {
                algorithm.self_test(self.scratchpad.lane_mut(lane))?;
            }
        }
        Ok(())
    }

    fn cursor(&self) -> &WorkerJob {
        &self.job
    }

    fn cursor_mut(&mut self) -> &mut WorkerJob {
        &mut self.job
    }

    fn can_hash(&self, job: &Job) -> bool {
        self.algorithms.iter().any(|a| a.algorithm_type() == job.algorithm())
    }

    fn on_job(&mut self) -> Result<(), MinerError> {
        let wanted = self.job.job().algorithm();
        self.current = self.algorithms.iter().find(|a| a.algorithm_type() == wanted).cloned();
        Ok(())
    }

    fn hash_round(&mut self, sink: &ResultSink) -> Result<Round, MinerError> {
        let algorithm = self
            .current
            .as_ref()
            .ok_or_else(|| MinerError::AlgorithmError("no algorithm selected".into()))?;

        let mut wrapped = false;
        for lane in 0..self.job.lanes() {
            let digest = algorithm.hash(self.job.blob(lane), self.scratchpad.lane_mut(lane))?;
            sink.check(self.job.job(), self.job.nonce(lane), digest);
            wrapped |= self.job.advance(lane);
        }

        Ok(Round {
            hashes: self.job.lanes() as u64,
            wrapped,
        })
    }

    fn rounds_per_sample(&self) -> u64 {
        ROUNDS_PER_SAMPLE
    }

    fn memory(&self) -> Option<MemInfo> {
        Some(self.scratchpad.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::algorithm::testing::{self, NonceEcho};
    use crate::types::AlgorithmType;

    fn launch(intensity: usize) -> CpuLaunchData {
        CpuLaunchData {
            algorithm: AlgorithmType::CnLiteV0,
            intensity,
            affinity: None,
            huge_pages: false,
            total_ways: intensity as u32,
            offset: 0,
        }
    }

    #[test]
    fn round_hashes_every_lane_and_reports_hits() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = ResultSink::new(tx);
        let mut worker = CpuWorker::new(0, &launch(2), &testing::registry()).unwrap();
        worker.self_test().unwrap();

        // target 0x100000001 accepts nonces 0 and 1 of lane 0 only
        let job = Job::from_hex(0, "cpu", AlgorithmType::CnLiteV0, &"00".repeat(76), "0100", false).unwrap();
        worker.cursor_mut().consume(&job, 1);
        worker.on_job().unwrap();

        for _ in 0..3 {
            let round = worker.hash_round(&sink).unwrap();
            assert_eq!(round.hashes, 2);
            assert!(!round.wrapped);
        }

        let nonces: Vec<u32> = rx.try_iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
        assert_eq!(worker.cursor().nonce(0), 3);
        assert_eq!(worker.cursor().nonce(1), 0x7FFF_FFFF + 3);
    }

    #[test]
    fn self_test_fails_on_broken_sibling() {
        let mut registry = testing::registry();
        registry.register(Arc::new(NonceEcho {
            algorithm: AlgorithmType::CnLiteV1,
            broken: true,
        }));
        let mut worker = CpuWorker::new(0, &launch(1), &registry).unwrap();
        assert!(matches!(worker.self_test(), Err(MinerError::SelfTestFailed(_))));
    }

    #[test]
    fn family_without_implementation_is_rejected() {
        let registry = AlgorithmRegistry::new();
        assert!(CpuWorker::new(0, &launch(1), &registry).is_err());
    }

    #[test]
    fn only_family_members_are_hashable() {
        let worker = CpuWorker::new(0, &launch(1), &testing::registry()).unwrap();
        let lite = Job::from_hex(0, "a", AlgorithmType::CnLiteV1, &"00".repeat(76), "0100", false).unwrap();
        let full = Job::from_hex(0, "b", AlgorithmType::CnV1, &"00".repeat(76), "0100", false).unwrap();
        assert!(worker.can_hash(&lite));
        assert!(!worker.can_hash(&full));
    }
}
