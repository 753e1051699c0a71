// src/backend/gpu/worker.rs
//! GPU worker
//!
//! One thread per device context. A round hands the device a batch of
//! `intensity` consecutive nonces, re-checks whatever candidates come back
//! against the job target and moves the cursor past the batch.

use crate::backend::device::{DeviceContext, DeviceLibrary};
use crate::backend::gpu::GpuLaunchData;
use crate::miner::job::Job;
use crate::miner::worker::{ResultSink, Round, Worker};
use crate::miner::worker_job::WorkerJob;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;

/// Worker feeding one device context
pub struct GpuWorker {
    id: usize,
    algorithm: AlgorithmType,
    intensity: u32,
    job: WorkerJob,
    context: Box<dyn DeviceContext>,
}

impl GpuWorker {
    /// Allocates the device context for `launch`
    pub fn new(id: usize, launch: &GpuLaunchData, library: &dyn DeviceLibrary) -> Result<Self, MinerError> {
        let context = library
            .allocate_context(launch.device, launch.algorithm, &launch.tuning)
            .map_err(|e| MinerError::DeviceError(format!("device #{}: {}", launch.device, e)))?;

        Ok(GpuWorker {
            id,
            algorithm: launch.algorithm,
            intensity: launch.tuning.intensity.max(1),
            job: WorkerJob::new(1, launch.total_ways, launch.offset),
            context,
        })
    }
}

impl Worker for GpuWorker {
    fn id(&self) -> usize {
        self.id
    }

    /// Kernels are validated by the device library when the context is built
    fn self_test(&mut self) -> Result<(), MinerError> {
        Ok(())
    }

    fn cursor(&self) -> &WorkerJob {
        &self.job
    }

    fn cursor_mut(&mut self) -> &mut WorkerJob {
        &mut self.job
    }

    fn can_hash(&self, job: &Job) -> bool {
        job.algorithm().family() == self.algorithm.family()
    }

    fn hash_round(&mut self, sink: &ResultSink) -> Result<Round, MinerError> {
        let start = self.job.nonce(0);
        let candidates = self.context.run_batch(self.job.blob(0), start, self.intensity)?;
        for candidate in candidates {
            sink.check(self.job.job(), candidate.nonce, candidate.digest);
        }

        let wrapped = self.job.next_round(1, self.intensity);
        Ok(Round {
            hashes: u64::from(self.intensity),
            wrapped,
        })
    }
}
