// src/backend/workers.rs
//! Worker thread pool
//!
//! Spawns one OS thread per planned worker, pins it when the plan carries an
//! affinity, constructs and self-tests the device side on that thread, then
//! hands it to the shared state machine.

use crate::backend::{BackendShared, LaunchStatus, LaunchSummary};
use crate::miner::worker::{self, ResultSink, Worker, WorkerContext};
use crate::stats::hashrate::Hashrate;
use crate::utils::error::MinerError;
use core_affinity::CoreId;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Per-thread launch parameters
pub trait LaunchData: Clone + Send + 'static {
    /// Logical CPU to pin the thread to
    fn affinity(&self) -> Option<usize>;

    /// Lanes the thread runs
    fn ways(&self) -> usize {
        1
    }
}

/// Threads of one backend
pub struct Workers<L: LaunchData> {
    launches: Vec<L>,
    handles: Vec<JoinHandle<()>>,
    hashrate: Option<Arc<Hashrate>>,
    status: Arc<LaunchStatus>,
}

impl<L: LaunchData> Workers<L> {
    /// Creates an empty pool reporting through `status`
    pub fn new(status: Arc<LaunchStatus>) -> Self {
        Workers {
            launches: Vec::new(),
            handles: Vec::new(),
            hashrate: None,
            status,
        }
    }

    /// Spawns a thread per launch
    ///
    /// `factory` runs on the new thread, so device memory and contexts are
    /// created where they are used. A thread whose construction or self-test
    /// fails exits without hashing; the others keep going.
    pub fn start<F>(&mut self, launches: Vec<L>, shared: Arc<BackendShared>, sink: ResultSink, factory: F)
    where
        F: Fn(usize, &L) -> Result<Box<dyn Worker>, MinerError> + Send + Sync + 'static,
    {
        let hashrate = Arc::new(Hashrate::new(launches.len()));
        let ways = launches.iter().map(LaunchData::ways).sum();
        self.status.start(launches.len(), ways);

        let factory = Arc::new(factory);
        for (index, launch) in launches.iter().cloned().enumerate() {
            let ctx = WorkerContext {
                index,
                shared: shared.clone(),
                sink: sink.clone(),
                hashrate: hashrate.clone(),
            };
            let factory = factory.clone();
            let status = self.status.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", shared.kind(), index))
                .spawn(move || {
                    if let Some(id) = launch.affinity() {
                        if !core_affinity::set_for_current(CoreId { id }) {
                            log::warn!("{} thread #{} could not be pinned to CPU {}", ctx.shared.kind(), index, id);
                        }
                    }

                    let mut worker = match factory(index, &launch).and_then(|mut w| w.self_test().map(|_| w)) {
                        Ok(worker) => worker,
                        Err(e) => {
                            log::error!("{} thread #{} failed to start: {}", ctx.shared.kind(), index, e);
                            status.failed(&ctx.shared);
                            return;
                        }
                    };

                    status.started(worker.memory(), &ctx.shared);
                    worker::run(worker.as_mut(), &ctx);
                });

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    log::error!("{} thread #{} could not be spawned: {}", shared.kind(), index, e);
                    self.status.failed(&shared);
                }
            }
        }

        self.launches = launches;
        self.hashrate = Some(hashrate);
    }

    /// Joins every thread
    ///
    /// The caller must have stopped the backend kind first, otherwise this
    /// blocks until it is.
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
    }

    /// Launch parameters of the current threads
    pub fn launches(&self) -> &[L] {
        &self.launches
    }

    /// Hashrate of the current threads
    pub fn hashrate(&self) -> Option<Arc<Hashrate>> {
        self.hashrate.clone()
    }

    /// Start progress of the current threads
    pub fn summary(&self) -> LaunchSummary {
        self.status.summary()
    }

    /// Whether any thread was spawned and not yet joined
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}
