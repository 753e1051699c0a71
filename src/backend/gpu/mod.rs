// src/backend/gpu/mod.rs
//! Generic accelerator backend
//!
//! CUDA and OpenCL differ only in their vendor library and defaults, so both
//! are a [`GpuBackend`] built by their own constructor. Readiness flips once
//! every configured device context was attempted and at least one came up.

/// Device-feeding worker
pub mod worker;

use crate::backend::device::{DeviceBackend, DeviceTuning};
use crate::backend::{Backend, BackendShared, LaunchData, LaunchStatus, Workers};
use crate::config::{GpuConfig, GpuThreadConfig};
use crate::miner::job::{Job, JobResult};
use crate::miner::nonce::NonceCoordinator;
use crate::miner::worker::{ResultSink, Worker};
use crate::stats::hashrate::{self, Hashrate};
use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use crossbeam_channel::Sender;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Launch parameters of one GPU thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuLaunchData {
    /// Device index within the vendor library
    pub device: usize,
    /// Algorithm the kernels are built for
    pub algorithm: AlgorithmType,
    /// Batch size and work-group size
    pub tuning: DeviceTuning,
    /// Host CPU to pin the thread to
    pub affinity: Option<usize>,
    /// Threads across the whole backend
    pub total_ways: u32,
    /// Index of this thread in the partition
    pub offset: u32,
}

impl LaunchData for GpuLaunchData {
    fn affinity(&self) -> Option<usize> {
        self.affinity
    }
}

struct GpuState {
    workers: Workers<GpuLaunchData>,
    algorithm: Option<AlgorithmType>,
}

/// Accelerator backend over a vendor device library
pub struct GpuBackend {
    kind: BackendKind,
    config: GpuConfig,
    device: DeviceBackend,
    default_intensity: u32,
    shared: Arc<BackendShared>,
    sink: ResultSink,
    state: Mutex<GpuState>,
    unavailable_reported: AtomicBool,
}

impl GpuBackend {
    /// Creates an idle backend; threads start with the first job
    ///
    /// # Arguments
    /// * `kind` - CUDA or OpenCL
    /// * `config` - The kind's configuration section
    /// * `device` - Resolved vendor library
    /// * `default_intensity` - Batch size for devices configured without one
    /// * `coordinator` - Process-wide generation counters
    /// * `results` - Result channel
    pub fn new(
        kind: BackendKind,
        config: GpuConfig,
        device: DeviceBackend,
        default_intensity: u32,
        coordinator: Arc<NonceCoordinator>,
        results: Sender<JobResult>,
    ) -> Self {
        GpuBackend {
            kind,
            config,
            device,
            default_intensity,
            shared: Arc::new(BackendShared::new(kind, coordinator)),
            sink: ResultSink::new(results),
            state: Mutex::new(GpuState {
                workers: Workers::new(Arc::new(LaunchStatus::new(kind))),
                algorithm: None,
            }),
            unavailable_reported: AtomicBool::new(false),
        }
    }

    /// Threads that would be started for `algorithm`
    pub fn launches(&self, algorithm: AlgorithmType) -> Vec<GpuLaunchData> {
        let device_count = self.device.library().map(|l| l.device_count()).unwrap_or(0);

        let threads: Vec<GpuThreadConfig> = if self.config.devices.is_empty() {
            (0..device_count)
                .map(|index| GpuThreadConfig {
                    index,
                    intensity: 0,
                    worksize: 8,
                    affinity: None,
                })
                .collect()
        } else {
            self.config
                .devices
                .iter()
                .filter(|thread| {
                    let known = thread.index < device_count;
                    if !known {
                        log::warn!("{} device #{} does not exist, skipping", self.kind, thread.index);
                    }
                    known
                })
                .cloned()
                .collect()
        };

        let total_ways = threads.len() as u32;
        threads
            .iter()
            .enumerate()
            .map(|(offset, thread)| GpuLaunchData {
                device: thread.index,
                algorithm,
                tuning: DeviceTuning {
                    intensity: if thread.intensity == 0 {
                        self.default_intensity
                    } else {
                        thread.intensity
                    },
                    worksize: thread.worksize,
                },
                affinity: thread.affinity,
                total_ways,
                offset: offset as u32,
            })
            .collect()
    }

    /// Shared state handed to the lanes
    pub fn shared(&self) -> &Arc<BackendShared> {
        &self.shared
    }

    fn state(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restart(&self, state: &mut GpuState, algorithm: AlgorithmType) -> Result<(), MinerError> {
        let Some(library) = self.device.library().cloned() else {
            return Ok(());
        };

        let launches = self.launches(algorithm);
        if launches.is_empty() {
            return Err(MinerError::DeviceError(format!("no {} devices to run on", self.kind)));
        }

        let coordinator = self.shared.coordinator();
        if state.workers.is_running() {
            log::info!("{} algorithm family changed to {}, restarting threads", self.kind, algorithm.family());
            coordinator.stop(self.kind);
            state.workers.stop();
            if !coordinator.rearm(self.kind) {
                return Ok(());
            }
        }

        self.shared.set_ready(false);
        state.algorithm = Some(algorithm);
        log::info!("{} use {} with {} threads for {}", self.kind, library.name(), launches.len(), algorithm);

        state
            .workers
            .start(launches, self.shared.clone(), self.sink.clone(), move |index, launch| {
                Ok(Box::new(worker::GpuWorker::new(index, launch, library.as_ref())?) as Box<dyn Worker>)
            });
        Ok(())
    }
}

impl Backend for GpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.device.is_live()
    }

    fn set_job(&self, job: &Job) -> Result<(), MinerError> {
        if !self.config.enabled || self.shared.coordinator().is_shutdown() {
            return Ok(());
        }
        if !self.device.is_live() {
            if !self.unavailable_reported.swap(true, Ordering::Relaxed) {
                log::warn!("{} disabled: {}", self.kind, self.device.describe());
            }
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
        if !self.device.is_live() {
            return self.device.describe();
        }
        let state = self.state();
        let summary = state.workers.summary();
        match state.algorithm {
            Some(algorithm) => format!(
                "{} {} threads {}/{}",
                self.device.describe(),
                algorithm,
                summary.started,
                summary.threads
            ),
            None => format!("{} idle", self.device.describe()),
        }
    }

    fn stop(&self) {
        let mut state = self.state();
        self.shared.coordinator().stop(self.kind);
        state.workers.stop();
    }

    fn to_json(&self) -> Value {
        let state = self.state();
        let rate = state.workers.hashrate();
        let threads: Vec<Value> = state
            .workers
            .launches()
            .iter()
            .enumerate()
            .map(|(index, launch)| {
                let speed = rate.as_ref().map(|r| hashrate::INTERVALS.map(|interval| r.calc(index, interval)));
                json!({
                    "index": launch.device,
                    "intensity": launch.tuning.intensity,
                    "worksize": launch.tuning.worksize,
                    "affinity": launch.affinity,
                    "hashrate": speed,
                })
            })
            .collect();

        json!({
            "type": self.kind.to_string(),
            "enabled": self.is_enabled(),
            "library": self.device.describe(),
            "algo": state.algorithm.map(|a| a.to_string()),
            "ready": self.shared.is_ready(),
            "threads": threads,
            "hashrate": rate.map(|r| r.totals()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::testing::FakeLibrary;
    use crate::config::GpuThreadConfig;
    use std::time::{Duration, Instant};

    fn backend(library: FakeLibrary, config: GpuConfig) -> (GpuBackend, crossbeam_channel::Receiver<JobResult>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let device = DeviceBackend::resolve(BackendKind::OpenCl, Some(Arc::new(library)), None);
        let gpu = GpuBackend::new(
            BackendKind::OpenCl,
            config,
            device,
            256,
            Arc::new(NonceCoordinator::new()),
            tx,
        );
        (gpu, rx)
    }

    fn enabled() -> GpuConfig {
        GpuConfig {
            enabled: true,
            ..GpuConfig::default()
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn one_thread_per_device_by_default() {
        let (gpu, _rx) = backend(FakeLibrary::new(3), enabled());
        let launches = gpu.launches(AlgorithmType::CnV0);
        assert_eq!(launches.len(), 3);
        assert!(launches.iter().all(|l| l.total_ways == 3 && l.tuning.intensity == 256));
        assert_eq!(launches[2].offset, 2);
    }

    #[test]
    fn unknown_devices_are_skipped() {
        let config = GpuConfig {
            enabled: true,
            loader: None,
            devices: vec![
                GpuThreadConfig {
                    index: 0,
                    intensity: 64,
                    worksize: 4,
                    affinity: Some(1),
                },
                GpuThreadConfig {
                    index: 9,
                    intensity: 64,
                    worksize: 4,
                    affinity: None,
                },
            ],
        };
        let (gpu, _rx) = backend(FakeLibrary::new(1), config);
        let launches = gpu.launches(AlgorithmType::CnV0);
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].tuning, DeviceTuning { intensity: 64, worksize: 4 });
        assert_eq!(launches[0].affinity, Some(1));
    }

    #[test]
    fn unavailable_library_disables_backend() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let gpu = GpuBackend::new(
            BackendKind::Cuda,
            enabled(),
            DeviceBackend::resolve(BackendKind::Cuda, None, None),
            256,
            Arc::new(NonceCoordinator::new()),
            tx,
        );
        assert!(!gpu.is_enabled());
        let job = Job::from_hex(0, "a", AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap();
        gpu.set_job(&job).unwrap();
        assert!(gpu.hashrate().is_none());
    }

    #[test]
    fn ready_with_a_failed_device_and_results_flow() {
        let mut library = FakeLibrary::new(2);
        library.broken_device = Some(1);
        let batches = library.batches.clone();
        let (gpu, rx) = backend(library, enabled());

        // target 0x100000001 accepts nonces 0 and 1 of device 0 only
        let job = Job::from_hex(0, "gpu", AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap();
        gpu.set_job(&job).unwrap();

        assert!(wait_for(|| gpu.shared().is_ready()));
        assert!(wait_for(|| batches.load(Ordering::Relaxed) > 0));
        gpu.stop();

        let nonces: Vec<u32> = rx.try_iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
        let summary = gpu.state().workers.summary();
        assert_eq!((summary.started, summary.failed), (1, 1));
    }
}
